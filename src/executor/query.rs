// ============================================================================
// src/executor/query.rs - SELECT, optionally locking what it returns
// ============================================================================

use super::access;
use super::{ExecutionContext, Executor};
use crate::core::{DbError, Result};
use crate::parser::ast::{SelectStmt, Statement};
use crate::result::QueryResult;
use crate::storage::LockWait;

use async_trait::async_trait;

pub struct QueryExecutor;

#[async_trait]
impl Executor for QueryExecutor {
    fn name(&self) -> &'static str {
        "SELECT"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Select(_))
    }

    async fn execute(&self, stmt: &Statement, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Select(select) = stmt else {
            return Err(DbError::UnsupportedOperation("QueryExecutor expects SELECT".into()));
        };

        self.execute_select(select, ctx).await
    }
}

impl QueryExecutor {
    async fn execute_select(&self, select: &SelectStmt, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let handle = ctx.storage.get_table(&select.table_name)?;
        let schema = access::schema_of(&handle)?;
        let (columns, indices) = access::resolve_projection(&schema, &select.projection)?;
        let terms = access::bind_filter(&schema, &select.filter, ctx.params)?;

        let candidates = access::matching_rows(&handle, ctx.txn, &terms)?;

        let rows = match select.lock {
            None => candidates.into_iter().map(|(_, row)| row).collect(),
            Some(clause) => {
                let wait = if clause.nowait { LockWait::NoWait } else { ctx.lock_wait };
                let mut locked = Vec::with_capacity(candidates.len());
                for (key, _) in candidates {
                    access::lock_row(ctx, &select.table_name, &key, wait).await?;
                    // The row may have changed while we waited for its lock.
                    if let Some(row) = access::recheck(&handle, &key, ctx.txn, &terms)? {
                        locked.push(row);
                    }
                }
                tracing::trace!(
                    txn = %ctx.txn,
                    table = %select.table_name,
                    rows = locked.len(),
                    "rows locked for update"
                );
                locked
            }
        };

        let rows = rows.iter().map(|row| access::project(row, &indices)).collect();
        Ok(QueryResult::new(columns, rows))
    }
}
