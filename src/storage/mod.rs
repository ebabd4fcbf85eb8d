pub mod lock;
pub mod memory;
pub mod table;

pub use lock::{LockKey, LockWait, RowLockManager};
pub use memory::InMemoryStorage;
pub use table::{Table, TableSchema};
