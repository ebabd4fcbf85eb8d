pub mod database;

pub use database::{Database, DEFAULT_STATEMENT_CACHE_CAPACITY};
