pub mod config;
pub mod pool;
pub mod session;

use crate::core::{DbError, Result, Value};
use crate::facade::Database;
use crate::parser::ast::Statement;
use crate::result::QueryResult;
use crate::storage::LockWait;
use crate::transaction::TransactionId;
use std::sync::Arc;
use std::time::Duration;

pub use config::ConnectionConfig;
pub use pool::{ConnectionPool, Lease, PoolStats};
pub use session::Session;

/// Database connection handle
///
/// Owns at most one transaction at a time. Statements issued outside an
/// explicit transaction run in their own implicit one and commit on success.
pub struct Connection {
    /// Unique connection ID
    id: u64,
    /// Shared database instance
    db: Arc<Database>,
    state: ConnectionState,
    /// Explicit transaction opened by BEGIN
    transaction_id: Option<TransactionId>,
    /// Implicit transaction of an autocommit statement still in flight
    implicit_txn: Option<TransactionId>,
    lock_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    InTransaction,
    /// A statement failed inside the transaction; only ROLLBACK is accepted.
    TransactionFailed,
    Closed,
}

impl Connection {
    pub(crate) fn new(id: u64, db: Arc<Database>, lock_timeout: Duration) -> Self {
        Self {
            id,
            db,
            state: ConnectionState::Idle,
            transaction_id: None,
            implicit_txn: None,
            lock_timeout,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    /// Check if connection is in a transaction (including a failed one)
    pub fn is_in_transaction(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::InTransaction | ConnectionState::TransactionFailed
        )
    }

    pub fn is_active(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    /// Execute one SQL statement with `$n` parameters
    ///
    /// # Examples
    ///
    /// ```ignore
    /// conn.execute("BEGIN", &[]).await?;
    /// conn.execute("UPDATE reservations SET room_no = $1 WHERE id = $2", &[309.into(), 43.into()]).await?;
    /// conn.execute("COMMIT", &[]).await?;
    /// ```
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;

        let stmt = match self.db.prepare(sql) {
            Ok(stmt) => stmt,
            Err(err) => {
                if self.state == ConnectionState::InTransaction {
                    self.state = ConnectionState::TransactionFailed;
                }
                return Err(err);
            }
        };

        match stmt.as_ref() {
            Statement::Begin => self.begin().map(|_| QueryResult::empty()),
            Statement::Commit => self.commit().map(|_| QueryResult::empty()),
            Statement::Rollback => self.rollback().map(|_| QueryResult::empty()),
            data => self.run(data, params).await,
        }
    }

    /// Alias for execute()
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.execute(sql, params).await
    }

    /// Execute a write and return the number of affected rows
    pub async fn exec(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let result = self.execute(sql, params).await?;
        Ok(result.rows_affected as u64)
    }

    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Err(DbError::ConnectionClosed),
            ConnectionState::InTransaction | ConnectionState::TransactionFailed => {
                Err(DbError::ExecutionError("Transaction already active".into()))
            }
            ConnectionState::Idle => {
                self.transaction_id = Some(self.db.begin()?);
                self.state = ConnectionState::InTransaction;
                Ok(())
            }
        }
    }

    /// Commit the current transaction. Committing a failed transaction rolls
    /// it back and reports `TransactionAborted`.
    pub fn commit(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Err(DbError::ConnectionClosed),
            ConnectionState::Idle => Err(DbError::ExecutionError("No active transaction".into())),
            ConnectionState::TransactionFailed => {
                self.rollback()?;
                Err(DbError::TransactionAborted)
            }
            ConnectionState::InTransaction => {
                let txn = self.finish()?;
                if let Err(err) = self.db.commit(txn) {
                    self.db.rollback(txn)?;
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Err(DbError::ConnectionClosed),
            ConnectionState::Idle => Err(DbError::ExecutionError("No active transaction".into())),
            ConnectionState::InTransaction | ConnectionState::TransactionFailed => {
                let txn = self.finish()?;
                self.db.rollback(txn)
            }
        }
    }

    /// Roll back whatever transaction is open, explicit or implicit, without
    /// awaiting. Safe to call in any state.
    pub fn abort(&mut self) -> Result<()> {
        let mut outcome = Ok(());
        for txn in [self.transaction_id.take(), self.implicit_txn.take()].into_iter().flatten() {
            if let Err(err) = self.db.rollback(txn) {
                tracing::error!(connection = self.id, %txn, error = %err, "rollback failed");
                outcome = Err(err);
            }
        }
        if self.is_in_transaction() {
            self.state = ConnectionState::Idle;
        }
        outcome
    }

    /// Close the connection
    pub fn close(&mut self) -> Result<()> {
        let outcome = self.abort();
        self.state = ConnectionState::Closed;
        outcome
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(DbError::ConnectionClosed);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<TransactionId> {
        self.state = ConnectionState::Idle;
        self.transaction_id
            .take()
            .ok_or_else(|| DbError::ExecutionError("No active transaction".into()))
    }

    async fn run(&mut self, stmt: &Statement, params: &[Value]) -> Result<QueryResult> {
        let wait = LockWait::Timeout(self.lock_timeout);

        match self.state {
            ConnectionState::Closed => Err(DbError::ConnectionClosed),
            ConnectionState::TransactionFailed => Err(DbError::TransactionAborted),
            ConnectionState::InTransaction => {
                let txn = self
                    .transaction_id
                    .ok_or_else(|| DbError::ExecutionError("No active transaction".into()))?;
                let result = self.db.execute_in(txn, stmt, params, wait).await;
                if result.is_err() {
                    self.state = ConnectionState::TransactionFailed;
                }
                result
            }
            ConnectionState::Idle => {
                let txn = self.db.begin()?;
                // Recorded so a dropped future still rolls back via abort().
                self.implicit_txn = Some(txn);
                let result = self.db.execute_in(txn, stmt, params, wait).await;
                self.implicit_txn = None;

                match result {
                    Ok(result) => {
                        self.db.commit(txn)?;
                        Ok(result)
                    }
                    Err(err) => {
                        if let Err(rollback_err) = self.db.rollback(txn) {
                            tracing::error!(connection = self.id, %txn, error = %rollback_err, "rollback failed");
                        }
                        Err(err)
                    }
                }
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Ensure any open transaction is rolled back
        if self.transaction_id.is_some() || self.implicit_txn.is_some() {
            let _ = self.abort();
        }
    }
}
