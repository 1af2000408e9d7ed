mod loader;
mod splitter;

pub use loader::ScriptLoader;
pub use splitter::StatementSplitter;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Raw SQL text plus the identifier it was read from.
#[derive(Debug, Clone)]
pub struct SqlScript {
    source: String,
    text: String,
}

impl SqlScript {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Plain,
    ProcedureBody,
}

/// One executable unit of a script, in script order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub position: usize,
    pub kind: StatementKind,
    pub sql: String,
}

impl Statement {
    pub fn is_procedure_body(&self) -> bool {
        self.kind == StatementKind::ProcedureBody
    }

    /// First line of the statement, shortened for progress output.
    pub fn summary(&self, max_chars: usize) -> String {
        let first_line = self.sql.lines().next().unwrap_or("").trim();
        if first_line.chars().count() <= max_chars {
            first_line.to_string()
        } else {
            let cut: String = first_line.chars().take(max_chars).collect();
            format!("{cut}...")
        }
    }
}
