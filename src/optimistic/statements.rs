//! SQL text for the optimistic operation's statements.
//!
//! Table and column names are interpolated, so each must be a plain
//! identifier. Values always travel as `$n` parameters.

use super::request::InsertSpec;
use super::snapshot::ChangeSet;
use crate::core::{DbError, Result, Value};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap();
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

pub fn validate_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(DbError::InvalidRequest(format!("'{}' is not a valid identifier", name)))
    }
}

/// `SELECT * FROM t WHERE key = $1 FOR UPDATE`
pub fn select_for_update(table: &str, key_column: &str, key: &Value) -> Result<SqlStatement> {
    validate_identifier(table)?;
    validate_identifier(key_column)?;
    Ok(SqlStatement {
        sql: format!("SELECT * FROM {} WHERE {} = $1 FOR UPDATE", table, key_column),
        params: vec![key.clone()],
    })
}

/// `UPDATE t SET a = $1, b = $2 WHERE key = $3`, fields in name order.
pub fn update(table: &str, key_column: &str, key: &Value, changes: &ChangeSet) -> Result<SqlStatement> {
    validate_identifier(table)?;
    validate_identifier(key_column)?;
    if changes.is_empty() {
        return Err(DbError::InvalidRequest("UPDATE needs at least one field".into()));
    }

    let mut params = Vec::with_capacity(changes.len() + 1);
    let mut assignments = Vec::with_capacity(changes.len());
    for (field, value) in changes.fields() {
        validate_identifier(field)?;
        params.push(value.clone());
        assignments.push(format!("{} = ${}", field, params.len()));
    }
    params.push(key.clone());

    Ok(SqlStatement {
        sql: format!(
            "UPDATE {} SET {} WHERE {} = ${}",
            table,
            assignments.join(", "),
            key_column,
            params.len()
        ),
        params,
    })
}

/// `INSERT INTO t (a, b) VALUES ($1, $2) RETURNING key`
pub fn insert_returning(spec: &InsertSpec) -> Result<SqlStatement> {
    validate_identifier(&spec.table)?;
    validate_identifier(&spec.key_column)?;
    if spec.values.is_empty() {
        return Err(DbError::InvalidRequest(format!(
            "Insert into '{}' has no values",
            spec.table
        )));
    }

    let mut columns = Vec::with_capacity(spec.values.len());
    let mut placeholders = Vec::with_capacity(spec.values.len());
    let mut params = Vec::with_capacity(spec.values.len());
    for (field, value) in &spec.values {
        validate_identifier(field)?;
        columns.push(field.as_str());
        params.push(value.clone());
        placeholders.push(format!("${}", params.len()));
    }

    Ok(SqlStatement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            spec.table,
            columns.join(", "),
            placeholders.join(", "),
            spec.key_column
        ),
        params,
    })
}
