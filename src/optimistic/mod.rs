// ============================================================================
// Optimistic Concurrency Module
// ============================================================================
//
// A caller holds a snapshot of one record, decides on a change and submits it
// together with dependent inserts. The change commits only if the stored row
// still equals the snapshot on every snapshot field; otherwise the caller gets
// the fresh values back.
//
// ============================================================================

pub mod executor;
pub mod request;
pub mod snapshot;
pub mod statements;

pub use executor::{ExecutorState, OptimisticExecutor, TracedOutcome};
pub use request::{
    ConflictResult, ErrorDescriptor, InsertSpec, OperationRequest, OperationResponse, Outcome,
    RowId,
};
pub use snapshot::{ChangeSet, Snapshot};
pub use statements::SqlStatement;
