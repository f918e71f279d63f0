// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic typed access: the [`Record`] trait plus query helpers.
//!
//! The helpers take a `&Connection` so they compose with
//! [`crate::Database::transaction`] as well as plain reads.

use crate::db::StorageError;
use rusqlite::types::{FromSql, Value};
use rusqlite::{params_from_iter, Connection, Row};

/// A struct stored one-row-per-instance in a table.
///
/// `values()` must produce one [`Value`] per entry of `COLUMNS`, in order;
/// list- and map-valued fields are JSON-encoded here and nowhere else.
pub trait Record: Sized {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    /// Primary-key columns, a prefix of `COLUMNS`.
    const KEY: &'static [&'static str] = &["id"];

    fn values(&self) -> Result<Vec<Value>, StorageError>;
    fn from_row(row: &Row<'_>) -> Result<Self, StorageError>;
}

/// Escape a SQLite identifier (as opposed to a string literal).
fn escape(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| escape(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Conversion into a bound SQL parameter.
///
/// Narrower than `Into<Value>` so string slices and owned strings both work
/// at call sites without ceremony.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl IntoValue for &String {
    fn into_value(self) -> Value {
        Value::Text(self.clone())
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Integer(self)
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Real(self)
    }
}

/// An ANDed set of WHERE clauses with bound parameters.
///
/// The query surface the system needs is small: equality, NULL tests, `IN`,
/// `GLOB` and ordered comparisons.
#[derive(Debug, Default, Clone)]
pub struct Filter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl IntoValue) -> Self {
        self.clauses.push(format!("{} = ?", escape(column)));
        self.params.push(value.into_value());
        self
    }

    pub fn null(mut self, column: &str) -> Self {
        self.clauses.push(format!("{} IS NULL", escape(column)));
        self
    }

    pub fn any_of(mut self, column: &str, values: impl IntoIterator<Item = Value>) -> Self {
        let values: Vec<Value> = values.into_iter().collect();
        if values.is_empty() {
            // IN () matches nothing
            self.clauses.push("1 = 0".to_string());
            return self;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.clauses
            .push(format!("{} IN ({})", escape(column), placeholders));
        self.params.extend(values);
        self
    }

    pub fn glob(mut self, column: &str, pattern: impl Into<String>) -> Self {
        self.clauses.push(format!("{} GLOB ?", escape(column)));
        self.params.push(Value::Text(pattern.into()));
        self
    }

    pub fn lt(mut self, column: &str, value: impl IntoValue) -> Self {
        self.clauses.push(format!("{} < ?", escape(column)));
        self.params.push(value.into_value());
        self
    }

    pub fn gt(mut self, column: &str, value: impl IntoValue) -> Self {
        self.clauses.push(format!("{} > ?", escape(column)));
        self.params.push(value.into_value());
        self
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    fn params(&self) -> Vec<Value> {
        self.params.clone()
    }
}

pub fn insert<R: Record>(conn: &Connection, item: &R) -> Result<(), StorageError> {
    let placeholders = vec!["?"; R::COLUMNS.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        escape(R::TABLE),
        column_list(R::COLUMNS),
        placeholders,
    );
    conn.execute(&sql, params_from_iter(item.values()?))?;
    Ok(())
}

/// Insert, or update every column when the key already exists.
///
/// Technically the key columns are rewritten too, which is harmless and
/// keeps the statement uniform.
pub fn upsert<R: Record>(conn: &Connection, item: &R) -> Result<(), StorageError> {
    let placeholders = vec!["?"; R::COLUMNS.len()].join(", ");
    let updates = R::COLUMNS
        .iter()
        .map(|c| format!("{} = excluded.{}", escape(c), escape(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
        escape(R::TABLE),
        column_list(R::COLUMNS),
        placeholders,
        column_list(R::KEY),
        updates,
    );
    conn.execute(&sql, params_from_iter(item.values()?))?;
    Ok(())
}

/// Rewrite every non-key, non-excluded column of an existing row.
pub fn update<R: Record>(
    conn: &Connection,
    item: &R,
    exclude: &[&str],
) -> Result<(), StorageError> {
    let values = item.values()?;
    let mut sets = Vec::new();
    let mut params = Vec::new();
    for (column, value) in R::COLUMNS.iter().zip(values.iter()) {
        if R::KEY.contains(column) || exclude.contains(column) {
            continue;
        }
        sets.push(format!("{} = ?", escape(column)));
        params.push(value.clone());
    }
    let mut wheres = Vec::new();
    for key in R::KEY {
        let index = R::COLUMNS.iter().position(|c| c == key).ok_or(
            StorageError::Decode {
                column: "key",
                value: (*key).to_string(),
            },
        )?;
        wheres.push(format!("{} = ?", escape(key)));
        params.push(values[index].clone());
    }
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        escape(R::TABLE),
        sets.join(", "),
        wheres.join(" AND "),
    );
    conn.execute(&sql, params_from_iter(params))?;
    Ok(())
}

/// Apply a partial patch to every row matching the filter.
pub fn update_where<R: Record>(
    conn: &Connection,
    patch: &[(&str, Value)],
    filter: &Filter,
) -> Result<usize, StorageError> {
    let sets = patch
        .iter()
        .map(|(column, _)| format!("{} = ?", escape(column)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut params: Vec<Value> = patch.iter().map(|(_, value)| value.clone()).collect();
    params.extend(filter.params());
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        escape(R::TABLE),
        sets,
        filter.where_sql(),
    );
    let changed = conn.execute(&sql, params_from_iter(params))?;
    Ok(changed)
}

pub fn find_where<R: Record>(conn: &Connection, filter: &Filter) -> Result<Vec<R>, StorageError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        column_list(R::COLUMNS),
        escape(R::TABLE),
        filter.where_sql(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(filter.params()))?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(R::from_row(row)?);
    }
    Ok(items)
}

pub fn find_one<R: Record>(conn: &Connection, filter: &Filter) -> Result<R, StorageError> {
    let mut items = find_where::<R>(conn, filter)?;
    match items.len() {
        1 => Ok(items.remove(0)),
        0 => Err(StorageError::NotFound { entity: R::TABLE }),
        count => Err(StorageError::MultipleRows {
            entity: R::TABLE,
            count,
        }),
    }
}

pub fn exists_where<R: Record>(conn: &Connection, filter: &Filter) -> Result<bool, StorageError> {
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE {})",
        escape(R::TABLE),
        filter.where_sql(),
    );
    let exists = conn.query_row(&sql, params_from_iter(filter.params()), |row| row.get(0))?;
    Ok(exists)
}

pub fn count_where<R: Record>(conn: &Connection, filter: &Filter) -> Result<i64, StorageError> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        escape(R::TABLE),
        filter.where_sql(),
    );
    let count = conn.query_row(&sql, params_from_iter(filter.params()), |row| row.get(0))?;
    Ok(count)
}

/// Select a single column from matching rows.
pub fn select_values<R: Record, T: FromSql>(
    conn: &Connection,
    column: &str,
    filter: &Filter,
) -> Result<Vec<T>, StorageError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        escape(column),
        escape(R::TABLE),
        filter.where_sql(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(filter.params()))?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        values.push(row.get(0)?);
    }
    Ok(values)
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
