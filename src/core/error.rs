use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Security violation: {}", .0.join("; "))]
    SecurityViolation(Vec<String>),
    #[error("Change application error: {0}")]
    ChangeApplication(#[from] ChangeApplicationError),
    #[error("Test execution error: {0}")]
    TestExecution(String),
    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Per-change failures. Captured into `ChangeApplicationResult.error` and
/// never raised past the applicator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChangeApplicationError {
    #[error("AlreadyExists: {0}")]
    AlreadyExists(String),
    #[error("NotFound: {0}")]
    NotFound(String),
    #[error("OutOfRange: line {line_number} not valid for {path} ({line_count} lines)")]
    OutOfRange {
        path: String,
        line_number: usize,
        line_count: usize,
    },
    #[error("InvalidPath: {0} escapes the sandbox")]
    InvalidPath(String),
    #[error("Io: {path}: {message}")]
    Io { path: String, message: String },
}

impl HarnessError {
    /// Stable label used as the prefix of run log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::SecurityViolation(_) => "SecurityViolation",
            HarnessError::ChangeApplication(_) => "ChangeApplicationError",
            HarnessError::TestExecution(_) => "TestExecutionError",
            HarnessError::ResourceLimitExceeded(_) => "ResourceLimitExceeded",
            HarnessError::Persistence(_) | HarnessError::RusqliteError(_) => "PersistenceError",
            HarnessError::Cancelled(_) => "Cancelled",
            HarnessError::DeadlineExceeded(_) => "DeadlineExceeded",
            HarnessError::ConfigError(_) => "ConfigError",
            HarnessError::NotFound(_) => "NotFound",
            HarnessError::IoError(_) | HarnessError::JsonError(_) => "UnexpectedError",
        }
    }
}
