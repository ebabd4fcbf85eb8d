// ============================================================================
// Transaction Manager
// ============================================================================

use super::{Change, Transaction, TransactionId, TransactionState};
use crate::core::{DbError, Result};
use crate::storage::{InMemoryStorage, RowLockManager};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct TransactionManager {
    transactions: Mutex<HashMap<TransactionId, Transaction>>,
    committed: AtomicU64,
    aborted: AtomicU64,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            transactions: Mutex::new(HashMap::new()),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
        }
    }

    pub fn begin(&self) -> Result<TransactionId> {
        let id = TransactionId::new();
        self.transactions.lock()?.insert(id, Transaction::new(id));
        Ok(id)
    }

    pub fn record_change(&self, txn_id: TransactionId, change: Change) -> Result<()> {
        let mut transactions = self.transactions.lock()?;
        let transaction = transactions
            .get_mut(&txn_id)
            .ok_or_else(|| DbError::ExecutionError(format!("Transaction {} not found", txn_id)))?;
        transaction.record_change(change)
    }

    pub fn is_active(&self, txn_id: TransactionId) -> bool {
        self.transactions
            .lock()
            .map(|t| t.contains_key(&txn_id))
            .unwrap_or(false)
    }

    /// Publish every pending write of the transaction, then release its row
    /// locks so waiters observe the committed rows.
    pub fn commit(
        &self,
        txn_id: TransactionId,
        storage: &InMemoryStorage,
        locks: &RowLockManager,
    ) -> Result<()> {
        let changes = {
            let mut transactions = self.transactions.lock()?;
            let mut transaction = transactions.remove(&txn_id).ok_or_else(|| {
                DbError::ExecutionError(format!("Transaction {} not found", txn_id))
            })?;
            transaction.commit()?
        };

        let published = apply_changes(&changes, storage, |table, key| table.publish(key, txn_id));
        let released = locks.release_all(txn_id);
        self.committed.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(txn = %txn_id, changes = changes.len(), "transaction committed");
        published?;
        released.map(|_| ())
    }

    /// Discard pending writes and release row locks. Rolling back an unknown or
    /// already finished transaction is a no-op.
    pub fn rollback(
        &self,
        txn_id: TransactionId,
        storage: &InMemoryStorage,
        locks: &RowLockManager,
    ) -> Result<()> {
        let removed = self.transactions.lock()?.remove(&txn_id);
        let Some(mut transaction) = removed else {
            locks.release_all(txn_id)?;
            return Ok(());
        };

        let changes = transaction.rollback()?;
        let discarded = apply_changes(&changes, storage, |table, key| table.discard(key, txn_id));
        let released = locks.release_all(txn_id);
        self.aborted.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(txn = %txn_id, changes = changes.len(), "transaction rolled back");
        discarded?;
        released.map(|_| ())
    }

    pub fn get_transaction_info(&self, txn_id: TransactionId) -> Result<Option<TransactionInfo>> {
        let transactions = self.transactions.lock()?;
        Ok(transactions.get(&txn_id).map(|txn| TransactionInfo {
            id: txn.id(),
            state: txn.state(),
            change_count: txn.change_count(),
            duration: txn.duration(),
        }))
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            active: self.transactions.lock().map(|t| t.len()).unwrap_or(0),
            committed: self.committed.load(Ordering::SeqCst),
            aborted: self.aborted.load(Ordering::SeqCst),
        }
    }
}

/// Apply `f` to every touched slot, continuing past failures and reporting
/// the first one.
fn apply_changes(
    changes: &[Change],
    storage: &InMemoryStorage,
    mut f: impl FnMut(&mut crate::storage::Table, &crate::core::RowKey),
) -> Result<()> {
    let mut first_error = None;
    for change in changes {
        let outcome = storage.get_table(change.table_name()).and_then(|handle| {
            let mut table = handle.write()?;
            f(&mut *table, change.key());
            Ok(())
        });
        if let Err(err) = outcome {
            tracing::error!(table = change.table_name(), error = %err, "failed to finalize row");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

pub struct TransactionInfo {
    pub id: TransactionId,
    pub state: TransactionState,
    pub change_count: usize,
    pub duration: std::time::Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionStats {
    pub active: usize,
    pub committed: u64,
    pub aborted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, RowKey, Value};
    use crate::storage::TableSchema;

    fn setup() -> (TransactionManager, InMemoryStorage, RowLockManager) {
        let storage = InMemoryStorage::new();
        storage
            .create_table(
                TableSchema::new("t")
                    .column(Column::new("id", DataType::Integer).primary_key())
                    .column(Column::new("v", DataType::Text)),
            )
            .unwrap();
        (TransactionManager::new(), storage, RowLockManager::new())
    }

    fn stage(manager: &TransactionManager, storage: &InMemoryStorage, txn: TransactionId, id: i64) {
        let handle = storage.get_table("t").unwrap();
        handle
            .write()
            .unwrap()
            .stage_insert(RowKey::Int(id), txn, vec![Value::Integer(id), Value::from("x")])
            .unwrap();
        manager
            .record_change(txn, Change::InsertRow { table: "t".into(), key: RowKey::Int(id) })
            .unwrap();
    }

    #[test]
    fn test_commit_publishes() {
        let (manager, storage, locks) = setup();
        let txn = manager.begin().unwrap();
        stage(&manager, &storage, txn, 1);

        manager.commit(txn, &storage, &locks).unwrap();
        assert_eq!(storage.row_count("t").unwrap(), 1);
        assert!(!manager.is_active(txn));
        assert_eq!(manager.stats().committed, 1);
    }

    #[test]
    fn test_rollback_discards() {
        let (manager, storage, locks) = setup();
        let txn = manager.begin().unwrap();
        stage(&manager, &storage, txn, 1);

        manager.rollback(txn, &storage, &locks).unwrap();
        assert_eq!(storage.row_count("t").unwrap(), 0);
        assert_eq!(manager.stats().aborted, 1);
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let (manager, storage, locks) = setup();
        let txn = manager.begin().unwrap();
        manager.rollback(txn, &storage, &locks).unwrap();
        manager.rollback(txn, &storage, &locks).unwrap();
        assert_eq!(manager.stats().aborted, 1);
    }

    #[test]
    fn test_commit_unknown_transaction() {
        let (manager, storage, locks) = setup();
        assert!(manager.commit(TransactionId::new(), &storage, &locks).is_err());
    }
}
