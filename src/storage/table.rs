use crate::core::{Column, DataType, DbError, Result, Row, RowKey};
use crate::transaction::TransactionId;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    /// Index of the column or a `ColumnNotFound` error naming this table.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.find_column_index(name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string(), self.name.clone()))
    }

    pub fn primary_key_index(&self) -> usize {
        self.columns.iter().position(|c| c.primary_key).unwrap_or(0)
    }

    pub fn primary_key(&self) -> &Column {
        &self.columns[self.primary_key_index()]
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(DbError::ExecutionError(format!(
                "Table '{}' must have at least one column",
                self.name
            )));
        }

        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(DbError::ExecutionError(format!(
                    "Duplicate column '{}' in table '{}'",
                    column.name, self.name
                )));
            }
            if column.auto_increment && !(column.primary_key && column.data_type == DataType::Integer) {
                return Err(DbError::ExecutionError(format!(
                    "Column '{}': auto_increment requires an INTEGER primary key",
                    column.name
                )));
            }
        }

        let keys: Vec<&Column> = self.columns.iter().filter(|c| c.primary_key).collect();
        match keys.as_slice() {
            [key] if matches!(key.data_type, DataType::Integer | DataType::Text) => Ok(()),
            [key] => Err(DbError::ExecutionError(format!(
                "Primary key '{}' must be INTEGER or TEXT, got {}",
                key.name, key.data_type
            ))),
            _ => Err(DbError::ExecutionError(format!(
                "Table '{}' must declare exactly one primary key column",
                self.name
            ))),
        }
    }

    /// Validate every value of a full-width row, returning it in storage form.
    pub fn validate_row(&self, row: Row) -> Result<Row> {
        if row.len() != self.columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Expected {} columns, got {}",
                self.columns.len(),
                row.len()
            )));
        }
        self.columns
            .iter()
            .zip(row)
            .map(|(column, value)| column.validate(value))
            .collect()
    }
}

/// An uncommitted write, visible only to the transaction that made it.
#[derive(Debug, Clone)]
struct PendingWrite {
    txn: TransactionId,
    row: Row,
}

#[derive(Debug, Clone, Default)]
struct RowSlot {
    committed: Option<Row>,
    pending: Option<PendingWrite>,
}

impl RowSlot {
    fn visible_to(&self, txn: TransactionId) -> Option<&Row> {
        match &self.pending {
            Some(pending) if pending.txn == txn => Some(&pending.row),
            _ => self.committed.as_ref(),
        }
    }
}

/// Rows keyed by primary key.
///
/// Each slot holds the committed image and at most one pending write. The
/// caller must hold the row lock for a key before staging a write to it.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<RowKey, RowSlot>,
    next_sequence: i64,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_sequence: 1,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Number of committed rows.
    pub fn row_count(&self) -> usize {
        self.rows.values().filter(|slot| slot.committed.is_some()).count()
    }

    /// Allocate the next auto-increment value. Values are never handed out twice,
    /// even when the inserting transaction rolls back.
    pub fn next_sequence(&mut self) -> i64 {
        let value = self.next_sequence;
        self.next_sequence += 1;
        value
    }

    pub fn visible_row(&self, key: &RowKey, txn: TransactionId) -> Option<&Row> {
        self.rows.get(key).and_then(|slot| slot.visible_to(txn))
    }

    pub fn visible_rows(&self, txn: TransactionId) -> Vec<(RowKey, Row)> {
        self.rows
            .iter()
            .filter_map(|(key, slot)| slot.visible_to(txn).map(|row| (key.clone(), row.clone())))
            .collect()
    }

    /// Stage a new row. Fails if the key is taken by a committed row or by any
    /// pending insert.
    pub fn stage_insert(&mut self, key: RowKey, txn: TransactionId, row: Row) -> Result<()> {
        if let Some(slot) = self.rows.get(&key)
            && (slot.committed.is_some() || slot.pending.is_some())
        {
            return Err(DbError::ConstraintViolation(format!(
                "Duplicate key {} for primary key '{}' in table '{}'",
                key,
                self.schema.primary_key().name,
                self.schema.name()
            )));
        }

        if let RowKey::Int(i) = key
            && self.schema.primary_key().auto_increment
            && i >= self.next_sequence
        {
            self.next_sequence = i + 1;
        }

        self.rows.insert(
            key,
            RowSlot {
                committed: None,
                pending: Some(PendingWrite { txn, row }),
            },
        );
        Ok(())
    }

    /// Stage a replacement image for an existing row.
    pub fn stage_update(&mut self, key: &RowKey, txn: TransactionId, row: Row) -> Result<()> {
        let table = self.schema.name().to_string();
        let slot = self.rows.get_mut(key).ok_or_else(|| {
            DbError::ExecutionError(format!("Row {} not found in table '{}'", key, table))
        })?;

        if let Some(pending) = &slot.pending
            && pending.txn != txn
        {
            return Err(DbError::ExecutionError(format!(
                "Row {} in table '{}' has a pending write from {}",
                key, table, pending.txn
            )));
        }

        slot.pending = Some(PendingWrite { txn, row });
        Ok(())
    }

    /// Make the transaction's pending write the committed image.
    pub fn publish(&mut self, key: &RowKey, txn: TransactionId) {
        if let Some(slot) = self.rows.get_mut(key)
            && slot.pending.as_ref().is_some_and(|p| p.txn == txn)
            && let Some(pending) = slot.pending.take()
        {
            slot.committed = Some(pending.row);
        }
    }

    /// Drop the transaction's pending write. Slots of never-committed inserts
    /// disappear entirely.
    pub fn discard(&mut self, key: &RowKey, txn: TransactionId) {
        let remove = match self.rows.get_mut(key) {
            Some(slot) if slot.pending.as_ref().is_some_and(|p| p.txn == txn) => {
                slot.pending = None;
                slot.committed.is_none()
            }
            _ => false,
        };
        if remove {
            self.rows.remove(key);
        }
    }
}
