use crate::core::Value;
use crate::storage::{InMemoryStorage, LockWait, RowLockManager};
use crate::transaction::{TransactionId, TransactionManager};

/// Everything a statement needs to run inside one transaction.
pub struct ExecutionContext<'a> {
    pub storage: &'a InMemoryStorage,
    pub locks: &'a RowLockManager,
    pub transactions: &'a TransactionManager,
    pub txn: TransactionId,
    pub params: &'a [Value],
    /// Wait policy for implicit row locks and plain `FOR UPDATE`.
    pub lock_wait: LockWait,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        storage: &'a InMemoryStorage,
        locks: &'a RowLockManager,
        transactions: &'a TransactionManager,
        txn: TransactionId,
        params: &'a [Value],
        lock_wait: LockWait,
    ) -> Self {
        Self {
            storage,
            locks,
            transactions,
            txn,
            params,
            lock_wait,
        }
    }
}
