mod mock;
mod sql_api;

pub use mock::{CatalogSnapshot, MockWarehouse};
pub use sql_api::{SqlApiChannel, TokenType};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("connection failure: {0}")]
    Connection(String),
    #[error("{0}")]
    Statement(String),
}

pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Values of one named column across all rows.
    pub fn column_values(&self, name: &str) -> Vec<&str> {
        match self.column_index(name) {
            Some(idx) => self
                .rows
                .iter()
                .filter_map(|row| row.get(idx).map(String::as_str))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Role, warehouse, database and schema a statement runs under.
///
/// Passed with every call instead of relying on a session's ambient state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub role: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl SessionContext {
    pub fn new(
        role: impl Into<String>,
        warehouse: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            role: Some(role.into()),
            warehouse: Some(warehouse.into()),
            database: Some(database.into()),
            schema: None,
        }
    }

    pub fn with_schema(&self, schema: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            ..self.clone()
        }
    }

    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            schema: None,
            ..self.clone()
        }
    }

    pub fn with_role(&self, role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..self.clone()
        }
    }

    pub fn with_warehouse(&self, warehouse: impl Into<String>) -> Self {
        Self {
            warehouse: Some(warehouse.into()),
            ..self.clone()
        }
    }
}

impl std::fmt::Display for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let part = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "role={} warehouse={} database={} schema={}",
            part(&self.role),
            part(&self.warehouse),
            part(&self.database),
            part(&self.schema)
        )
    }
}

/// Synchronous command channel to the warehouse.
///
/// One call executes exactly one statement under the given context and
/// returns its rows. Implementations distinguish connection-level failures
/// from statement failures.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn execute(&self, context: &SessionContext, sql: &str) -> ChannelResult<QueryResult>;

    /// Cheap round trip used before a run to surface connection failures early.
    async fn ping(&self, context: &SessionContext) -> ChannelResult<()> {
        self.execute(context, "SELECT 1").await.map(|_| ())
    }
}
