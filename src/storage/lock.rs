//! Exclusive row locks held until the owning transaction ends.
//!
//! Waiters park on a shared `Notify` and re-check the lock table after every
//! release, so a waiter never holds the table mutex across an await.

use crate::core::{DbError, Result, RowKey};
use crate::transaction::TransactionId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub table: String,
    pub key: RowKey,
}

impl LockKey {
    pub fn new(table: impl Into<String>, key: RowKey) -> Self {
        Self {
            table: table.into(),
            key,
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row({}:{})", self.table, self.key)
    }
}

/// How long a lock request may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Fail immediately if another transaction holds the lock.
    NoWait,
    /// Block for at most this long.
    Timeout(Duration),
}

#[derive(Default)]
struct LockTable {
    holders: HashMap<LockKey, TransactionId>,
    held_by: HashMap<TransactionId, HashSet<LockKey>>,
}

impl LockTable {
    fn try_grant(&mut self, txn: TransactionId, key: &LockKey) -> Option<TransactionId> {
        match self.holders.get(key) {
            Some(holder) if *holder == txn => None,
            Some(holder) => Some(*holder),
            None => {
                self.holders.insert(key.clone(), txn);
                self.held_by.entry(txn).or_default().insert(key.clone());
                None
            }
        }
    }
}

pub struct RowLockManager {
    table: Mutex<LockTable>,
    released: Notify,
}

impl Default for RowLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RowLockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Notify::new(),
        }
    }

    /// Acquire an exclusive lock on `key` for `txn`. Re-entrant for the holder.
    pub async fn acquire(&self, txn: TransactionId, key: &LockKey, wait: LockWait) -> Result<()> {
        let deadline = match wait {
            LockWait::NoWait => None,
            LockWait::Timeout(timeout) => Some(Instant::now() + timeout),
        };

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the
            // await is not missed.
            notified.as_mut().enable();

            let holder = {
                let mut table = self.table.lock()?;
                table.try_grant(txn, key)
            };

            let Some(holder) = holder else {
                return Ok(());
            };

            let Some(deadline) = deadline else {
                tracing::debug!(%txn, %holder, lock = %key, "row lock unavailable (nowait)");
                return Err(lock_timeout(key));
            };

            tracing::debug!(%txn, %holder, lock = %key, "waiting for row lock");
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(%txn, %holder, lock = %key, "row lock wait timed out");
                return Err(lock_timeout(key));
            }
        }
    }

    /// Release every lock held by `txn` and wake all waiters.
    pub fn release_all(&self, txn: TransactionId) -> Result<usize> {
        let released = {
            let mut table = self.table.lock()?;
            let keys = table.held_by.remove(&txn).unwrap_or_default();
            for key in &keys {
                table.holders.remove(key);
            }
            keys.len()
        };

        if released > 0 {
            self.released.notify_waiters();
        }
        Ok(released)
    }

    pub fn holder(&self, key: &LockKey) -> Result<Option<TransactionId>> {
        let table = self.table.lock()?;
        Ok(table.holders.get(key).copied())
    }

    /// Number of row locks currently held across all transactions.
    pub fn held_count(&self) -> Result<usize> {
        let table = self.table.lock()?;
        Ok(table.holders.len())
    }
}

fn lock_timeout(key: &LockKey) -> DbError {
    DbError::LockTimeout {
        table: key.table.clone(),
        key: key.key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(id: i64) -> LockKey {
        LockKey::new("reservations", RowKey::Int(id))
    }

    #[tokio::test]
    async fn test_lock_is_reentrant() {
        let locks = RowLockManager::new();
        let txn = TransactionId::new();

        locks.acquire(txn, &key(1), LockWait::NoWait).await.unwrap();
        locks.acquire(txn, &key(1), LockWait::NoWait).await.unwrap();
        assert_eq!(locks.held_count().unwrap(), 1);
        assert_eq!(locks.release_all(txn).unwrap(), 1);
        assert_eq!(locks.held_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nowait_conflict() {
        let locks = RowLockManager::new();
        let a = TransactionId::new();
        let b = TransactionId::new();

        locks.acquire(a, &key(1), LockWait::NoWait).await.unwrap();
        let err = locks.acquire(b, &key(1), LockWait::NoWait).await.unwrap_err();
        assert!(matches!(err, DbError::LockTimeout { .. }));

        // Different rows do not conflict
        locks.acquire(b, &key(2), LockWait::NoWait).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let locks = RowLockManager::new();
        let a = TransactionId::new();
        let b = TransactionId::new();

        locks.acquire(a, &key(1), LockWait::NoWait).await.unwrap();
        let err = locks
            .acquire(b, &key(1), LockWait::Timeout(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::LockTimeout { .. }));
        assert_eq!(locks.holder(&key(1)).unwrap(), Some(a));
    }

    #[tokio::test]
    async fn test_waiter_granted_after_release() {
        let locks = Arc::new(RowLockManager::new());
        let a = TransactionId::new();
        let b = TransactionId::new();

        locks.acquire(a, &key(1), LockWait::NoWait).await.unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .acquire(b, &key(1), LockWait::Timeout(Duration::from_secs(5)))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        locks.release_all(a).unwrap();

        waiter.await.unwrap().unwrap();
        assert_eq!(locks.holder(&key(1)).unwrap(), Some(b));
    }
}
