use thiserror::Error;

#[derive(Error, Debug)]
pub enum SfDriftError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection failure: {0}")]
    Connection(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Invalid path pattern: {0}")]
    Pattern(String),
}

pub type Result<T> = std::result::Result<T, SfDriftError>;

impl SfDriftError {
    /// Connection-level failures abort a run; everything else is reported as data.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SfDriftError::Connection(_))
    }
}
