// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Read-committed transactions over row slots: writes stay pending (visible to
// their own transaction only) until COMMIT publishes them. Exclusive row locks
// serialize writers to the same row.
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod state;

pub use change::Change;
pub use manager::{TransactionInfo, TransactionManager, TransactionStats};
pub use state::{Transaction, TransactionId, TransactionState};
