use super::snapshot::{ChangeSet, Snapshot};
use super::statements::validate_identifier;
use crate::core::{DbError, ErrorKind, FieldMap, Result, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_key_column() -> String {
    "id".to_string()
}

/// One row to insert after the update, before commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertSpec {
    pub table: String,
    pub values: FieldMap,
    /// Column returned as the new row's id
    #[serde(default = "default_key_column")]
    pub key_column: String,
}

impl InsertSpec {
    pub fn new(table: impl Into<String>, values: FieldMap) -> Self {
        Self {
            table: table.into(),
            values,
            key_column: default_key_column(),
        }
    }

    pub fn value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }
}

/// A fully formed optimistic operation on one record
///
/// Built before any connection is leased, so no lease is held while the
/// caller decides what to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub table: String,
    #[serde(default = "default_key_column")]
    pub key_column: String,
    pub snapshot: Snapshot,
    #[serde(default)]
    pub changes: ChangeSet,
    #[serde(default)]
    pub dependent_inserts: Vec<InsertSpec>,
}

impl OperationRequest {
    pub fn new(table: impl Into<String>, snapshot: Snapshot) -> Self {
        Self {
            table: table.into(),
            key_column: default_key_column(),
            snapshot,
            changes: ChangeSet::default(),
            dependent_inserts: Vec::new(),
        }
    }

    pub fn key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    pub fn changes(mut self, changes: ChangeSet) -> Self {
        self.changes = changes;
        self
    }

    pub fn insert(mut self, spec: InsertSpec) -> Self {
        self.dependent_inserts.push(spec);
        self
    }

    /// The record's key, taken from the snapshot.
    pub fn key(&self) -> Result<&Value> {
        let value = self.snapshot.get(&self.key_column).ok_or_else(|| {
            DbError::InvalidRequest(format!(
                "Snapshot must contain the key column '{}'",
                self.key_column
            ))
        })?;
        match value {
            Value::Integer(_) | Value::Text(_) => Ok(value),
            other => Err(DbError::InvalidRequest(format!(
                "Key column '{}' must be an integer or text, got {}",
                self.key_column,
                other.type_name()
            ))),
        }
    }

    /// Checks that the request can be turned into safe statements.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.table)?;
        validate_identifier(&self.key_column)?;
        self.key()?;

        for field in self.snapshot.field_names() {
            validate_identifier(field)?;
        }
        for (field, _) in self.changes.fields() {
            validate_identifier(field)?;
            if *field == self.key_column {
                return Err(DbError::InvalidRequest(format!(
                    "Changing the key column '{}' is not allowed",
                    field
                )));
            }
        }
        for spec in &self.dependent_inserts {
            validate_identifier(&spec.table)?;
            validate_identifier(&spec.key_column)?;
            if spec.values.is_empty() {
                return Err(DbError::InvalidRequest(format!(
                    "Dependent insert into '{}' has no values",
                    spec.table
                )));
            }
            for field in spec.values.keys() {
                validate_identifier(field)?;
            }
        }
        Ok(())
    }
}

/// Identifies one row the operation wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowId {
    pub table: String,
    pub id: Value,
}

impl RowId {
    pub fn new(table: impl Into<String>, id: Value) -> Self {
        Self {
            table: table.into(),
            id,
        }
    }
}

/// Outcome of an operation that ran to a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResult {
    /// Snapshot matched; the update and inserts are committed.
    Applied { affected_ids: Vec<RowId> },
    /// Snapshot is stale. `current_values` holds the stored values of the
    /// snapshot fields that differ; empty when the record is gone.
    Conflicted {
        current_values: FieldMap,
        record_missing: bool,
    },
}

impl ConflictResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, ConflictResult::Applied { .. })
    }

    pub fn is_conflicted(&self) -> bool {
        matches!(self, ConflictResult::Conflicted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Applied,
    Conflicted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&DbError> for ErrorDescriptor {
    fn from(err: &DbError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Wire form of an operation's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub operation_id: Uuid,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_ids: Option<Vec<RowId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_values: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_missing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
}

impl OperationResponse {
    pub fn from_result(operation_id: Uuid, result: &Result<ConflictResult>) -> Self {
        let mut response = Self {
            operation_id,
            outcome: Outcome::Failed,
            affected_ids: None,
            current_values: None,
            record_missing: None,
            error: None,
        };

        match result {
            Ok(ConflictResult::Applied { affected_ids }) => {
                response.outcome = Outcome::Applied;
                response.affected_ids = Some(affected_ids.clone());
            }
            Ok(ConflictResult::Conflicted { current_values, record_missing }) => {
                response.outcome = Outcome::Conflicted;
                response.current_values = Some(current_values.clone());
                response.record_missing = Some(*record_missing);
            }
            Err(err) => {
                response.error = Some(ErrorDescriptor::from(err));
            }
        }
        response
    }
}
