use serde::{Deserialize, Serialize};
use std::fmt;

/// Case-insensitive identifier comparison (unquoted names fold to upper case).
pub fn ident_eq(a: &str, b: &str) -> bool {
    a.trim_matches('"').eq_ignore_ascii_case(b.trim_matches('"'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetType {
    String,
    Float,
    Integer,
}

impl TargetType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            TargetType::String => "STRING",
            TargetType::Float => "FLOAT",
            TargetType::Integer => "INTEGER",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

impl std::str::FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STRING" | "VARCHAR" | "TEXT" => Ok(TargetType::String),
            "FLOAT" | "DOUBLE" | "REAL" => Ok(TargetType::Float),
            "INTEGER" | "INT" | "NUMBER" => Ok(TargetType::Integer),
            other => Err(format!("unsupported masking policy type '{other}'")),
        }
    }
}

/// Schema-qualified name of a masking policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRef {
    pub schema: String,
    pub name: String,
}

impl PolicyRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl PartialEq for PolicyRef {
    fn eq(&self, other: &Self) -> bool {
        ident_eq(&self.schema, &other.schema) && ident_eq(&self.name, &other.name)
    }
}

impl Eq for PolicyRef {}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Desired masking policy. Never read back from the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub schema: String,
    pub name: String,
    pub target_type: TargetType,
    /// Masking expression, evaluated with the column value bound to `val`.
    pub body: String,
}

impl PolicyDefinition {
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        target_type: TargetType,
        body: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            target_type,
            body: body.into(),
        }
    }

    pub fn reference(&self) -> PolicyRef {
        PolicyRef::new(&self.schema, &self.name)
    }
}

/// Desired association between a column and a masking policy.
///
/// `policy` is resolved in the binding's own schema unless it is
/// schema-qualified (`OTHER_SCHEMA.policy_name`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnBinding {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub policy: String,
}

impl ColumnBinding {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        policy: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
            policy: policy.into(),
        }
    }

    pub fn policy_ref(&self) -> PolicyRef {
        match self.policy.split_once('.') {
            Some((schema, name)) => PolicyRef::new(schema, name),
            None => PolicyRef::new(&self.schema, &self.policy),
        }
    }

    pub fn target(&self) -> String {
        format!("{}.{}.{}", self.schema, self.table, self.column)
    }
}

impl PartialEq for ColumnBinding {
    fn eq(&self, other: &Self) -> bool {
        ident_eq(&self.schema, &other.schema)
            && ident_eq(&self.table, &other.table)
            && ident_eq(&self.column, &other.column)
            && self.policy_ref() == other.policy_ref()
    }
}

impl Eq for ColumnBinding {}

impl fmt::Display for ColumnBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.target(), self.policy)
    }
}
