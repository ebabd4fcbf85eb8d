use super::{Table, TableSchema};
use crate::core::{DbError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Table registry. Each table has its own lock; the registry lock only guards
/// the name map. Neither is ever held across an await.
pub struct InMemoryStorage {
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        schema.validate()?;
        let name = schema.name().to_string();

        let mut tables = self.tables.write()?;
        if tables.contains_key(&name) {
            return Err(DbError::TableExists(name));
        }

        tables.insert(name, Arc::new(RwLock::new(Table::new(schema))));
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Result<Arc<RwLock<Table>>> {
        self.tables
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn get_schema(&self, name: &str) -> Result<TableSchema> {
        let table = self.get_table(name)?;
        let table = table.read()?;
        Ok(table.schema().clone())
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables
            .read()
            .map(|tables| tables.contains_key(name))
            .unwrap_or(false)
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Committed row count.
    pub fn row_count(&self, name: &str) -> Result<usize> {
        let table = self.get_table(name)?;
        let table = table.read()?;
        Ok(table.row_count())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}
