use super::{Connection, config::ConnectionConfig};
use crate::core::{DbError, Result, Value};
use crate::facade::Database;
use crate::result::QueryResult;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Connection pool
///
/// Bounds the number of leases handed out at once. Each lease owns one
/// connection exclusively until it is released; waiting for a lease never
/// holds any row lock.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: ConnectionConfig,
    db: Arc<Database>,
    /// One permit per connection that may be leased
    permits: Arc<Semaphore>,
    /// Connections waiting to be leased again
    idle: Mutex<VecDeque<PooledConnection>>,
    /// Open connections, idle or leased
    total_connections: AtomicUsize,
    next_id: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// A connection from the pool
struct PooledConnection {
    connection: Connection,
    created_at: Instant,
    last_used: Instant,
}

impl PooledConnection {
    fn new(connection: Connection) -> Self {
        let now = Instant::now();
        Self {
            connection,
            created_at: now,
            last_used: now,
        }
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|lifetime| self.created_at.elapsed() > lifetime)
    }

    fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|timeout| self.last_used.elapsed() > timeout)
    }

    fn refresh_last_used(&mut self) {
        self.last_used = Instant::now();
    }
}

impl ConnectionPool {
    /// Create a pool over a shared database, opening `min_connections` eagerly.
    pub fn new(config: ConnectionConfig, db: Arc<Database>) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            permits: Arc::new(Semaphore::new(config.max_connections)),
            idle: Mutex::new(VecDeque::new()),
            total_connections: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            config,
            db,
        });

        let pool = Self { inner };
        pool.ensure_min_connections()?;
        Ok(pool)
    }

    /// Create a pool with its own empty database.
    ///
    /// Useful for testing to ensure tests don't interfere with each other.
    pub fn new_isolated(config: ConnectionConfig) -> Result<Self> {
        let db = Arc::new(Database::with_statement_cache(config.statement_cache_capacity));
        Self::new(config, db)
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.inner.db
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Lease a connection, waiting at most `acquire_timeout`.
    pub async fn acquire(&self) -> Result<Lease> {
        let timeout = self.inner.config.acquire_timeout;
        let permit = tokio::time::timeout(timeout, Arc::clone(&self.inner.permits).acquire_owned())
            .await
            .map_err(|_| {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "connection pool exhausted");
                DbError::PoolExhausted(timeout)
            })?
            .map_err(|_| DbError::ConnectionClosed)?;

        let mut pooled = match self.inner.take_idle()? {
            Some(pooled) => pooled,
            None => self.inner.open_connection(),
        };
        pooled.refresh_last_used();

        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(connection = pooled.connection.id(), "lease acquired");

        Ok(Lease {
            pooled: Some(pooled),
            pool: Arc::clone(&self.inner),
            permit: Some(permit),
        })
    }

    fn ensure_min_connections(&self) -> Result<()> {
        let mut idle = self.inner.idle.lock()?;
        while self.inner.total_connections.load(Ordering::SeqCst) < self.inner.config.min_connections {
            idle.push_back(self.inner.open_connection());
        }
        Ok(())
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let max = inner.config.max_connections;
        PoolStats {
            total: inner.total_connections.load(Ordering::SeqCst),
            idle: inner.idle.lock().map(|idle| idle.len()).unwrap_or(0),
            outstanding: max.saturating_sub(inner.permits.available_permits()),
            max,
            acquired: inner.acquired.load(Ordering::SeqCst),
            released: inner.released.load(Ordering::SeqCst),
        }
    }
}

impl PoolInner {
    fn open_connection(&self) -> PooledConnection {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.total_connections.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(connection = id, "connection opened");
        PooledConnection::new(Connection::new(id, Arc::clone(&self.db), self.config.lock_timeout))
    }

    fn close_connection(&self, mut pooled: PooledConnection, reason: &'static str) {
        let id = pooled.connection.id();
        if let Err(err) = pooled.connection.close() {
            tracing::error!(connection = id, error = %err, "failed to close connection");
        }
        self.total_connections.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection = id, reason, "connection closed");
    }

    /// Pop the freshest reusable idle connection, closing stale ones on the way.
    fn take_idle(&self) -> Result<Option<PooledConnection>> {
        let mut idle = self.idle.lock()?;
        while let Some(pooled) = idle.pop_front() {
            if pooled.is_expired(self.config.max_lifetime) {
                self.close_connection(pooled, "max_lifetime");
            } else if pooled.is_idle_too_long(self.config.idle_timeout) {
                self.close_connection(pooled, "idle_timeout");
            } else {
                return Ok(Some(pooled));
            }
        }
        Ok(None)
    }

    fn give_back(&self, mut pooled: PooledConnection) {
        // A connection whose transaction cannot be rolled back is not reused.
        if let Err(err) = pooled.connection.abort() {
            tracing::error!(connection = pooled.connection.id(), error = %err, "rollback on release failed");
            self.close_connection(pooled, "rollback_failed");
            return;
        }
        if !pooled.connection.is_active() {
            self.close_connection(pooled, "closed");
            return;
        }
        if pooled.is_expired(self.config.max_lifetime) {
            self.close_connection(pooled, "max_lifetime");
            return;
        }

        pooled.refresh_last_used();
        match self.idle.lock() {
            Ok(mut idle) => idle.push_front(pooled),
            Err(_) => self.close_connection(pooled, "pool_poisoned"),
        }
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Open connections, idle or leased
    pub total: usize,
    pub idle: usize,
    /// Leases currently held
    pub outstanding: usize,
    pub max: usize,
    /// Leases handed out since the pool was created
    pub acquired: u64,
    /// Leases returned since the pool was created
    pub released: u64,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} outstanding, {} idle, {} open, {} acquired, {} released",
            self.outstanding, self.max, self.idle, self.total, self.acquired, self.released
        )
    }
}

/// Exclusive use of one pooled connection
///
/// Released exactly once: by `release()` or, failing that, on drop. Release
/// rolls back any open transaction before the connection is reused.
pub struct Lease {
    pooled: Option<PooledConnection>,
    pool: Arc<PoolInner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Lease {
    /// Get a reference to the connection
    pub fn connection(&mut self) -> Result<&mut Connection> {
        self.pooled
            .as_mut()
            .map(|pooled| &mut pooled.connection)
            .ok_or(DbError::ConnectionClosed)
    }

    pub fn connection_ref(&self) -> Result<&Connection> {
        self.pooled
            .as_ref()
            .map(|pooled| &pooled.connection)
            .ok_or(DbError::ConnectionClosed)
    }

    pub fn is_released(&self) -> bool {
        self.pooled.is_none()
    }

    /// Execute a statement (convenience method)
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.connection()?.execute(sql, params).await
    }

    /// Begin a transaction (convenience method)
    pub fn begin(&mut self) -> Result<()> {
        self.connection()?.begin()
    }

    /// Commit a transaction (convenience method)
    pub fn commit(&mut self) -> Result<()> {
        self.connection()?.commit()
    }

    /// Rollback a transaction (convenience method)
    pub fn rollback(&mut self) -> Result<()> {
        self.connection()?.rollback()
    }

    /// Return the connection to the pool. Later calls are no-ops.
    pub fn release(&mut self) {
        let Some(pooled) = self.pooled.take() else {
            return;
        };

        let id = pooled.connection.id();
        self.pool.give_back(pooled);
        self.permit.take();
        self.pool.released.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(connection = id, "lease released");
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("test")
            .min_connections(0)
            .acquire_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_pool_creation() {
        let pool = ConnectionPool::new_isolated(config().min_connections(2).max_connections(5)).unwrap();
        let stats = pool.stats();

        assert_eq!(stats.total, 2); // min_connections
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.max, 5);
    }

    #[tokio::test]
    async fn test_lease_reuses_idle_connection() {
        let pool = ConnectionPool::new_isolated(config().min_connections(1)).unwrap();

        let first_id = {
            let mut lease = pool.acquire().await.unwrap();
            assert_eq!(pool.stats().outstanding, 1);
            assert_eq!(pool.stats().idle, 0);
            lease.connection().unwrap().id()
        };

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.idle, 1);

        let mut lease = pool.acquire().await.unwrap();
        assert_eq!(lease.connection().unwrap().id(), first_id);
        assert_eq!(pool.stats().total, 1);
    }

    #[tokio::test]
    async fn test_max_connections_limit() {
        let pool = ConnectionPool::new_isolated(config().max_connections(2)).unwrap();

        let _conn1 = pool.acquire().await.unwrap();
        let _conn2 = pool.acquire().await.unwrap();

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, DbError::PoolExhausted(_)));
        assert_eq!(pool.stats().outstanding, 2);
    }

    #[tokio::test]
    async fn test_waiter_gets_released_lease() {
        let pool = ConnectionPool::new_isolated(
            config().max_connections(1).acquire_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let pool = ConnectionPool::new_isolated(config()).unwrap();
        let mut lease = pool.acquire().await.unwrap();

        lease.release();
        lease.release();
        assert!(lease.is_released());
        assert!(lease.connection().is_err());
        drop(lease);

        let stats = pool.stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.outstanding, 0);
    }

    #[tokio::test]
    async fn test_release_rolls_back_open_transaction() {
        let pool = ConnectionPool::new_isolated(config()).unwrap();
        let mut lease = pool.acquire().await.unwrap();
        lease.begin().unwrap();
        assert_eq!(pool.database().transaction_stats().active, 1);

        lease.release();
        let stats = pool.database().transaction_stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.aborted, 1);
    }

    #[tokio::test]
    async fn test_expired_connection_is_replaced() {
        let pool = ConnectionPool::new_isolated(
            config().min_connections(1).max_lifetime(Duration::from_millis(10)),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut lease = pool.acquire().await.unwrap();
        assert_ne!(lease.connection().unwrap().id(), 1);
        assert_eq!(pool.stats().total, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ConnectionPool::new_isolated(config().max_connections(0)).is_err());
    }
}
