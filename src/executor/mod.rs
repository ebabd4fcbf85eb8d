pub mod context;
pub mod executor;
pub mod dml;
pub mod query;
pub mod update;
mod access;

pub use context::ExecutionContext;
pub use executor::{Executor, ExecutorPipeline};
