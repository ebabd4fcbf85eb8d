// ============================================================================
// occtx Library
// ============================================================================

pub mod core;
pub mod storage;
pub mod transaction;
pub mod result;
pub mod facade;
pub mod connection;
pub mod optimistic;
pub mod parser;
mod executor;

// Re-export main types for convenience
pub use facade::Database;
pub use core::{Column, DataType, DbError, ErrorKind, FieldMap, Result, Value};
pub use result::QueryResult;
pub use storage::TableSchema;

// Re-export connection API
pub use connection::{
    Connection,
    ConnectionState,
    Session,
    config::ConnectionConfig,
    pool::{ConnectionPool, Lease, PoolStats},
};

pub use optimistic::{
    ChangeSet, ConflictResult, ExecutorState, InsertSpec, OperationRequest, OperationResponse,
    OptimisticExecutor, Outcome, RowId, Snapshot, TracedOutcome,
};

use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// High-level Client API
// ============================================================================

/// Pooled access to one database
///
/// This is the recommended way to run optimistic operations: the client
/// leases a connection only once the request is fully formed and returns it
/// on every exit path.
///
/// # Examples
///
/// ```
/// use occtx::{ChangeSet, Client, Column, ConnectionConfig, DataType, OperationRequest, Snapshot, TableSchema, Value};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::connect(ConnectionConfig::new("hotel"))?;
/// client.create_table(
///     TableSchema::new("reservations")
///         .column(Column::new("id", DataType::Integer).primary_key())
///         .column(Column::new("room_no", DataType::Integer)),
/// )?;
/// client.query("INSERT INTO reservations VALUES (43, NULL)", &[]).await?;
///
/// let snapshot: Snapshot = [("id", Value::Integer(43)), ("room_no", Value::Null)].into_iter().collect();
/// let request = OperationRequest::new("reservations", snapshot)
///     .changes(ChangeSet::new().set("room_no", 309));
///
/// let result = client.execute_optimistic(&request).await?;
/// assert!(result.is_applied());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    pool: ConnectionPool,
    executor: OptimisticExecutor,
}

impl Client {
    /// Create a database and a pool over it.
    pub fn connect(config: ConnectionConfig) -> Result<Self> {
        Ok(Self::with_pool(ConnectionPool::new_isolated(config)?))
    }

    /// Connect using a connection string
    ///
    /// Format: `occtx://host/database?max_connections=4&acquire_timeout_ms=500`
    pub fn connect_url(url: &str) -> Result<Self> {
        Self::connect(ConnectionConfig::from_url(url)?)
    }

    pub fn with_pool(pool: ConnectionPool) -> Self {
        Self {
            pool,
            executor: OptimisticExecutor::new(),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        self.pool.database()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        self.database().create_table(schema)
    }

    /// Run one optimistic operation on a freshly leased connection.
    pub async fn execute_optimistic(&self, request: &OperationRequest) -> Result<ConflictResult> {
        request.validate()?;
        let mut lease = self.pool.acquire().await?;
        let result = self.executor.execute(&mut lease, request).await;
        lease.release();
        result
    }

    /// Like [`execute_optimistic`](Self::execute_optimistic), folding every
    /// outcome, failures included, into the wire response.
    pub async fn submit(&self, request: &OperationRequest) -> OperationResponse {
        if let Err(err) = request.validate() {
            return OperationResponse::from_result(Uuid::new_v4(), &Err(err));
        }

        let mut lease = match self.pool.acquire().await {
            Ok(lease) => lease,
            Err(err) => return OperationResponse::from_result(Uuid::new_v4(), &Err(err)),
        };
        let outcome = self.executor.execute_traced(&mut lease, request).await;
        lease.release();

        OperationResponse::from_result(outcome.operation_id, &outcome.result)
    }

    /// Execute one statement in autocommit mode on a leased connection
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut lease = self.pool.acquire().await?;
        lease.execute(sql, params).await
    }

    /// Lease a connection for multi-statement work
    ///
    /// The lease rolls back any open transaction when it is released or
    /// dropped.
    pub async fn lease(&self) -> Result<Lease> {
        self.pool.acquire().await
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
