use super::access::{self, TableHandle};
use super::{ExecutionContext, Executor};
use crate::core::{DbError, Result, Row, RowKey, Value};
use crate::parser::ast::{InsertStmt, Operand, Statement};
use crate::result::QueryResult;
use crate::storage::TableSchema;
use crate::transaction::Change;

use async_trait::async_trait;

pub struct InsertExecutor;

#[async_trait]
impl Executor for InsertExecutor {
    fn name(&self) -> &'static str {
        "INSERT"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Insert(_))
    }

    async fn execute(&self, stmt: &Statement, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Insert(insert) = stmt else {
            return Err(DbError::UnsupportedOperation("InsertExecutor expects INSERT".into()));
        };

        self.execute_insert(insert, ctx).await
    }
}

impl InsertExecutor {
    async fn execute_insert(&self, insert: &InsertStmt, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let handle = ctx.storage.get_table(&insert.table_name)?;
        let schema = access::schema_of(&handle)?;
        let targets = self.target_columns(&schema, &insert.columns)?;

        let returning = insert
            .returning
            .as_ref()
            .map(|projection| access::resolve_projection(&schema, projection))
            .transpose()?;

        let pk = schema.primary_key_index();
        let mut inserted = Vec::with_capacity(insert.values.len());

        for values in &insert.values {
            let row = self.build_row(&schema, &handle, &targets, values, ctx.params)?;
            let key = RowKey::try_from(&row[pk])?;

            access::check_foreign_keys(ctx.storage, &schema, &row, ctx.txn, None)?;

            // A concurrent insert of the same key holds this lock until it ends.
            access::lock_row(ctx, &insert.table_name, &key, ctx.lock_wait).await?;

            ctx.transactions.record_change(
                ctx.txn,
                Change::InsertRow {
                    table: insert.table_name.clone(),
                    key: key.clone(),
                },
            )?;
            access::stage_insert(&handle, key, ctx.txn, row.clone())?;
            inserted.push(row);
        }

        tracing::trace!(
            txn = %ctx.txn,
            table = %insert.table_name,
            rows = inserted.len(),
            "rows inserted"
        );

        Ok(match returning {
            Some((columns, indices)) => {
                let rows = inserted.iter().map(|row| access::project(row, &indices)).collect();
                QueryResult::new(columns, rows)
            }
            None => QueryResult::affected(inserted.len()),
        })
    }

    /// Table column index for each value position.
    fn target_columns(&self, schema: &TableSchema, columns: &[String]) -> Result<Vec<usize>> {
        if columns.is_empty() {
            return Ok((0..schema.columns().len()).collect());
        }

        let mut targets = Vec::with_capacity(columns.len());
        for name in columns {
            let idx = schema.column_index(name)?;
            if targets.contains(&idx) {
                return Err(DbError::ExecutionError(format!(
                    "Column '{}' specified more than once",
                    name
                )));
            }
            targets.push(idx);
        }
        Ok(targets)
    }

    fn build_row(
        &self,
        schema: &TableSchema,
        handle: &TableHandle,
        targets: &[usize],
        values: &[Operand],
        params: &[Value],
    ) -> Result<Row> {
        if values.len() != targets.len() {
            return Err(DbError::ExecutionError(format!(
                "Expected {} values, got {}",
                targets.len(),
                values.len()
            )));
        }

        let mut row: Row = vec![Value::Null; schema.columns().len()];
        for (idx, operand) in targets.iter().zip(values) {
            row[*idx] = operand.bind(params)?;
        }

        let pk = schema.primary_key_index();
        if schema.primary_key().auto_increment && !targets.contains(&pk) {
            row[pk] = Value::Integer(access::next_sequence(handle)?);
        }

        schema.validate_row(row)
    }
}
