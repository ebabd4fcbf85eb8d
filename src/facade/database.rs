use crate::core::{DbError, Result, Value};
use crate::executor::{ExecutionContext, ExecutorPipeline};
use crate::parser::SqlParserAdapter;
use crate::parser::ast::Statement;
use crate::result::QueryResult;
use crate::storage::{InMemoryStorage, LockWait, RowLockManager, TableSchema};
use crate::transaction::{TransactionId, TransactionManager, TransactionStats};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 128;

/// Shared engine state behind every connection: tables, row locks,
/// transactions and a cache of parsed statements.
pub struct Database {
    parser: SqlParserAdapter,
    statement_cache: Mutex<LruCache<String, Arc<Statement>>>,
    storage: InMemoryStorage,
    locks: RowLockManager,
    transactions: TransactionManager,
    executor_pipeline: ExecutorPipeline,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Self::with_statement_cache(DEFAULT_STATEMENT_CACHE_CAPACITY)
    }

    pub fn with_statement_cache(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            parser: SqlParserAdapter::new(),
            statement_cache: Mutex::new(LruCache::new(capacity)),
            storage: InMemoryStorage::new(),
            locks: RowLockManager::new(),
            transactions: TransactionManager::new(),
            executor_pipeline: ExecutorPipeline::with_default_executors(),
        }
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        for column in schema.columns() {
            if let Some(fk) = &column.references {
                let target = self.storage.get_schema(&fk.table).or_else(|err| {
                    // Self-references resolve against the table being created.
                    if fk.table == schema.name() { Ok(schema.clone()) } else { Err(err) }
                })?;
                target.column_index(&fk.column)?;
            }
        }

        let name = schema.name().to_string();
        self.storage.create_table(schema)?;
        tracing::debug!(table = %name, "table created");
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.storage.table_exists(name)
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.storage.list_tables()
    }

    pub fn get_schema(&self, name: &str) -> Result<TableSchema> {
        self.storage.get_schema(name)
    }

    /// Committed row count.
    pub fn row_count(&self, table: &str) -> Result<usize> {
        self.storage.row_count(table)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parse `sql`, reusing an earlier parse of the identical text.
    pub fn prepare(&self, sql: &str) -> Result<Arc<Statement>> {
        if let Some(stmt) = self.statement_cache.lock()?.get(sql) {
            return Ok(Arc::clone(stmt));
        }

        let stmt = Arc::new(self.parser.parse(sql)?);
        self.statement_cache
            .lock()?
            .put(sql.to_string(), Arc::clone(&stmt));
        Ok(stmt)
    }

    pub fn cached_statements(&self) -> usize {
        self.statement_cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Run a data statement inside an open transaction.
    pub async fn execute_in(
        &self,
        txn: TransactionId,
        stmt: &Statement,
        params: &[Value],
        lock_wait: LockWait,
    ) -> Result<QueryResult> {
        if stmt.is_transaction_control() {
            return Err(DbError::UnsupportedOperation(
                "Transaction control must go through the connection".into(),
            ));
        }
        if !self.transactions.is_active(txn) {
            return Err(DbError::ExecutionError(format!(
                "Transaction {} is not active",
                txn
            )));
        }

        let ctx = ExecutionContext::new(
            &self.storage,
            &self.locks,
            &self.transactions,
            txn,
            params,
            lock_wait,
        );
        self.executor_pipeline.execute(stmt, &ctx).await
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn begin(&self) -> Result<TransactionId> {
        let txn = self.transactions.begin()?;
        tracing::trace!(%txn, "transaction started");
        Ok(txn)
    }

    pub fn commit(&self, txn: TransactionId) -> Result<()> {
        self.transactions.commit(txn, &self.storage, &self.locks)
    }

    /// Safe to call for finished or unknown transactions.
    pub fn rollback(&self, txn: TransactionId) -> Result<()> {
        self.transactions.rollback(txn, &self.storage, &self.locks)
    }

    pub fn is_active(&self, txn: TransactionId) -> bool {
        self.transactions.is_active(txn)
    }

    pub fn transaction_stats(&self) -> TransactionStats {
        self.transactions.stats()
    }

    /// Row locks currently held across all transactions.
    pub fn locks_held(&self) -> Result<usize> {
        self.locks.held_count()
    }
}
