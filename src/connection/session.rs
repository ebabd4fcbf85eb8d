use super::{Connection, Lease};
use crate::core::{Result, Value};
use crate::result::QueryResult;

use async_trait::async_trait;

/// Something that runs SQL statements on one exclusive connection.
#[async_trait]
pub trait Session: Send {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    fn in_transaction(&self) -> bool;

    /// Roll back any open transaction without awaiting.
    fn abort(&mut self) -> Result<()>;
}

#[async_trait]
impl Session for Connection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        Connection::execute(self, sql, params).await
    }

    fn in_transaction(&self) -> bool {
        self.is_in_transaction()
    }

    fn abort(&mut self) -> Result<()> {
        Connection::abort(self)
    }
}

#[async_trait]
impl Session for Lease {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.connection()?.execute(sql, params).await
    }

    fn in_transaction(&self) -> bool {
        self.connection_ref()
            .map(|conn| conn.is_in_transaction())
            .unwrap_or(false)
    }

    fn abort(&mut self) -> Result<()> {
        self.connection()?.abort()
    }
}
