use super::dml::InsertExecutor;
use super::query::QueryExecutor;
use super::update::UpdateExecutor;
use super::ExecutionContext;
use crate::core::{DbError, Result};
use crate::parser::ast::Statement;
use crate::result::QueryResult;

use async_trait::async_trait;

#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, stmt: &Statement) -> bool;
    async fn execute(&self, stmt: &Statement, ctx: &ExecutionContext<'_>) -> Result<QueryResult>;
}

pub struct ExecutorPipeline {
    executors: Vec<Box<dyn Executor>>,
}

impl ExecutorPipeline {
    pub fn new() -> Self {
        Self {
            executors: Vec::new(),
        }
    }

    /// SELECT, UPDATE and INSERT.
    pub fn with_default_executors() -> Self {
        let mut pipeline = Self::new();
        pipeline.register(Box::new(QueryExecutor));
        pipeline.register(Box::new(UpdateExecutor));
        pipeline.register(Box::new(InsertExecutor));
        pipeline
    }

    pub fn register(&mut self, executor: Box<dyn Executor>) {
        self.executors.push(executor);
    }

    pub async fn execute(
        &self,
        stmt: &Statement,
        ctx: &ExecutionContext<'_>,
    ) -> Result<QueryResult> {
        let expected = stmt.param_count();
        if ctx.params.len() < expected {
            return Err(DbError::ExecutionError(format!(
                "Statement expects {} parameter(s), {} supplied",
                expected,
                ctx.params.len()
            )));
        }

        for executor in &self.executors {
            if executor.can_handle(stmt) {
                tracing::trace!(executor = executor.name(), txn = %ctx.txn, "dispatching statement");
                return executor.execute(stmt, ctx).await;
            }
        }

        Err(DbError::UnsupportedOperation(
            "No executor found for statement".into(),
        ))
    }
}

impl Default for ExecutorPipeline {
    fn default() -> Self {
        Self::with_default_executors()
    }
}
