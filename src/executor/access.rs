//! Row access shared by the statement executors.
//!
//! Every helper here takes the table lock, copies what it needs and lets the
//! guard go before returning. Executors only await on row locks, never while a
//! table guard is alive.

use super::ExecutionContext;
use crate::core::{DbError, Result, Row, RowKey, Value};
use crate::parser::ast::{Predicate, Projection};
use crate::storage::{InMemoryStorage, LockKey, LockWait, Table, TableSchema};
use crate::transaction::TransactionId;
use std::sync::{Arc, RwLock};

pub(crate) type TableHandle = Arc<RwLock<Table>>;

/// A bound equality term: column index and the value it must equal.
pub(crate) type Term = (usize, Value);

pub(crate) fn schema_of(handle: &TableHandle) -> Result<TableSchema> {
    let table = handle.read()?;
    Ok(table.schema().clone())
}

/// Resolve predicate columns and bind parameters, coercing each value to the
/// column's type.
pub(crate) fn bind_filter(
    schema: &TableSchema,
    filter: &[Predicate],
    params: &[Value],
) -> Result<Vec<Term>> {
    filter
        .iter()
        .map(|predicate| {
            let idx = schema.column_index(&predicate.column)?;
            let value = predicate.value.bind(params)?;
            if value.is_null() {
                return Ok((idx, value));
            }
            let column = &schema.columns()[idx];
            let value = column.data_type.coerce(value).map_err(|_| {
                DbError::TypeMismatch(format!(
                    "Cannot compare column '{}' of type {} with the given value",
                    column.name, column.data_type
                ))
            })?;
            Ok((idx, value))
        })
        .collect()
}

/// NULL never satisfies an equality term.
pub(crate) fn row_matches(row: &Row, terms: &[Term]) -> bool {
    terms.iter().all(|(idx, value)| row[*idx].sql_eq(value))
}

fn point_key(schema: &TableSchema, terms: &[Term]) -> Option<RowKey> {
    let pk = schema.primary_key_index();
    terms
        .iter()
        .find(|(idx, _)| *idx == pk)
        .and_then(|(_, value)| RowKey::try_from(value).ok())
}

fn collect_matching(table: &Table, txn: TransactionId, terms: &[Term]) -> Vec<(RowKey, Row)> {
    if let Some(key) = point_key(table.schema(), terms) {
        return table
            .visible_row(&key, txn)
            .filter(|row| row_matches(row, terms))
            .map(|row| vec![(key, row.clone())])
            .unwrap_or_default();
    }

    table
        .visible_rows(txn)
        .into_iter()
        .filter(|(_, row)| row_matches(row, terms))
        .collect()
}

/// Rows visible to `txn` that satisfy every term, in key order.
pub(crate) fn matching_rows(handle: &TableHandle, txn: TransactionId, terms: &[Term]) -> Result<Vec<(RowKey, Row)>> {
    let table = handle.read()?;
    Ok(collect_matching(&table, txn, terms))
}

/// The row's current image for `txn`, if it still satisfies the terms.
pub(crate) fn recheck(
    handle: &TableHandle,
    key: &RowKey,
    txn: TransactionId,
    terms: &[Term],
) -> Result<Option<Row>> {
    let table = handle.read()?;
    Ok(table
        .visible_row(key, txn)
        .filter(|row| row_matches(row, terms))
        .cloned())
}

pub(crate) async fn lock_row(
    ctx: &ExecutionContext<'_>,
    table: &str,
    key: &RowKey,
    wait: LockWait,
) -> Result<()> {
    ctx.locks
        .acquire(ctx.txn, &LockKey::new(table, key.clone()), wait)
        .await
}

pub(crate) fn next_sequence(handle: &TableHandle) -> Result<i64> {
    let mut table = handle.write()?;
    Ok(table.next_sequence())
}

pub(crate) fn stage_insert(handle: &TableHandle, key: RowKey, txn: TransactionId, row: Row) -> Result<()> {
    let mut table = handle.write()?;
    table.stage_insert(key, txn, row)
}

pub(crate) fn stage_update(handle: &TableHandle, key: &RowKey, txn: TransactionId, row: Row) -> Result<()> {
    let mut table = handle.write()?;
    table.stage_update(key, txn, row)
}

/// Column names and indices for a projection.
pub(crate) fn resolve_projection(
    schema: &TableSchema,
    projection: &Projection,
) -> Result<(Vec<String>, Vec<usize>)> {
    match projection {
        Projection::All => Ok((schema.column_names(), (0..schema.columns().len()).collect())),
        Projection::Columns(names) => {
            let indices = names
                .iter()
                .map(|name| schema.column_index(name))
                .collect::<Result<Vec<_>>>()?;
            Ok((names.clone(), indices))
        }
    }
}

pub(crate) fn project(row: &Row, indices: &[usize]) -> Row {
    indices.iter().map(|idx| row[*idx].clone()).collect()
}

/// Check that every non-NULL reference in `row` points at a row visible to
/// `txn`. `only` limits the check to the given column indices.
pub(crate) fn check_foreign_keys(
    storage: &InMemoryStorage,
    schema: &TableSchema,
    row: &Row,
    txn: TransactionId,
    only: Option<&[usize]>,
) -> Result<()> {
    for (i, column) in schema.columns().iter().enumerate() {
        let Some(fk) = &column.references else {
            continue;
        };
        if only.is_some_and(|cols| !cols.contains(&i)) {
            continue;
        }
        let value = &row[i];
        if value.is_null() {
            continue;
        }

        let handle = storage.get_table(&fk.table)?;
        let referenced = handle.read()?;
        let ref_schema = referenced.schema();
        let col_idx = ref_schema.column_index(&fk.column)?;

        let exists = if col_idx == ref_schema.primary_key_index() {
            RowKey::try_from(value)
                .ok()
                .and_then(|key| referenced.visible_row(&key, txn))
                .is_some()
        } else {
            referenced
                .visible_rows(txn)
                .iter()
                .any(|(_, r)| r[col_idx].sql_eq(value))
        };

        if !exists {
            return Err(DbError::ConstraintViolation(format!(
                "Foreign key violation: Value {} in '{}.{}' references non-existent key in '{}.{}'",
                value,
                schema.name(),
                column.name,
                fk.table,
                fk.column
            )));
        }
    }
    Ok(())
}
