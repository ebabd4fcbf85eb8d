use super::access;
use super::{ExecutionContext, Executor};
use crate::core::{DbError, Result, Value};
use crate::parser::ast::{Statement, UpdateStmt};
use crate::result::QueryResult;
use crate::transaction::Change;

use async_trait::async_trait;

/// UPDATE with an implicit exclusive lock on every row it writes.
pub struct UpdateExecutor;

#[async_trait]
impl Executor for UpdateExecutor {
    fn name(&self) -> &'static str {
        "UPDATE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Update(_))
    }

    async fn execute(&self, stmt: &Statement, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Update(update) = stmt else {
            return Err(DbError::UnsupportedOperation("UpdateExecutor expects UPDATE".into()));
        };

        self.execute_update(update, ctx).await
    }
}

impl UpdateExecutor {
    async fn execute_update(&self, update: &UpdateStmt, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let handle = ctx.storage.get_table(&update.table_name)?;
        let schema = access::schema_of(&handle)?;
        let terms = access::bind_filter(&schema, &update.filter, ctx.params)?;

        let assignments: Vec<(usize, Value)> = update
            .assignments
            .iter()
            .map(|assignment| {
                let idx = schema.column_index(&assignment.column)?;
                let column = &schema.columns()[idx];
                if column.primary_key {
                    return Err(DbError::UnsupportedOperation(format!(
                        "Updating primary key column '{}' is not supported",
                        column.name
                    )));
                }
                let value = column.validate(assignment.value.bind(ctx.params)?)?;
                Ok((idx, value))
            })
            .collect::<Result<Vec<_>>>()?;
        let assigned: Vec<usize> = assignments.iter().map(|(idx, _)| *idx).collect();

        let returning = update
            .returning
            .as_ref()
            .map(|projection| access::resolve_projection(&schema, projection))
            .transpose()?;

        let candidates = access::matching_rows(&handle, ctx.txn, &terms)?;

        let mut updated = Vec::with_capacity(candidates.len());
        for (key, _) in candidates {
            access::lock_row(ctx, &update.table_name, &key, ctx.lock_wait).await?;

            let Some(mut row) = access::recheck(&handle, &key, ctx.txn, &terms)? else {
                continue;
            };
            for (idx, value) in &assignments {
                row[*idx] = value.clone();
            }

            access::check_foreign_keys(ctx.storage, &schema, &row, ctx.txn, Some(&assigned))?;

            ctx.transactions.record_change(
                ctx.txn,
                Change::UpdateRow {
                    table: update.table_name.clone(),
                    key: key.clone(),
                },
            )?;
            access::stage_update(&handle, &key, ctx.txn, row.clone())?;
            updated.push(row);
        }

        tracing::trace!(
            txn = %ctx.txn,
            table = %update.table_name,
            rows = updated.len(),
            "rows updated"
        );

        Ok(match returning {
            Some((columns, indices)) => {
                let rows = updated.iter().map(|row| access::project(row, &indices)).collect();
                QueryResult::new(columns, rows)
            }
            None => QueryResult::affected(updated.len()),
        })
    }
}
