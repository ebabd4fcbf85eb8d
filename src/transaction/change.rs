// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Each Change names a row slot that carries a pending write for the
// transaction. COMMIT publishes those writes, ROLLBACK discards them.
//
// ============================================================================

use crate::core::RowKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A new row was staged
    InsertRow { table: String, key: RowKey },

    /// An existing row received a new pending image
    UpdateRow { table: String, key: RowKey },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
        }
    }

    pub fn key(&self) -> &RowKey {
        match self {
            Change::InsertRow { key, .. } => key,
            Change::UpdateRow { key, .. } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_accessors() {
        let change = Change::InsertRow {
            table: "invoices".to_string(),
            key: RowKey::Int(1),
        };
        assert_eq!(change.table_name(), "invoices");
        assert_eq!(change.key(), &RowKey::Int(1));
    }
}
