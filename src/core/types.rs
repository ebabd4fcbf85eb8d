use super::{DbError, Result, DataType, Value};
use std::collections::BTreeMap;
use std::fmt;

pub type Row = Vec<Value>;

/// Field name -> value, ordered by field name.
pub type FieldMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub references: Option<ForeignKey>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            references: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark as the table's primary key (implies NOT NULL).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Assign the next sequence value when an INSERT omits this column.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    /// Check nullability and type, returning the value in storage form.
    pub fn validate(&self, value: Value) -> Result<Value> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(value);
        }

        self.data_type.coerce(value).map_err(|_| {
            DbError::TypeMismatch(format!(
                "Column '{}' expects type {}",
                self.name, self.data_type
            ))
        })
    }
}

/// Primary key of a stored row.
///
/// Only INTEGER and TEXT columns can be keys, which keeps keys totally ordered
/// and hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Int(i64),
    Text(String),
}

impl RowKey {
    pub fn to_value(&self) -> Value {
        match self {
            RowKey::Int(i) => Value::Integer(*i),
            RowKey::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl TryFrom<&Value> for RowKey {
    type Error = DbError;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(RowKey::Int(*i)),
            Value::Text(s) => Ok(RowKey::Text(s.clone())),
            other => Err(DbError::TypeMismatch(format!(
                "{} cannot be used as a primary key value",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Int(i) => write!(f, "{}", i),
            RowKey::Text(s) => write!(f, "'{}'", s),
        }
    }
}
