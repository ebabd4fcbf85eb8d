pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, ErrorKind, Result};
pub use types::{Column, FieldMap, ForeignKey, Row, RowKey};
pub use value::{DataType, Value};
