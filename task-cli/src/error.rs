use std::path::PathBuf;
use thiserror::Error;

/// Every way a single invocation can fail.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Validation(String),

    #[error("task with ID {0} not found.")]
    NotFound(u32),

    #[error("{} is not a valid task file: {reason}", .path.display())]
    CorruptData { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl TaskError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        TaskError::Validation(message.into())
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        TaskError::CorruptData {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Process exit code for this error. Success is always 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            TaskError::Validation(_) | TaskError::Config(_) => 2,
            TaskError::NotFound(_) => 3,
            TaskError::CorruptData { .. } => 4,
            TaskError::Io(_) => 5,
        }
    }
}

impl From<config::ConfigError> for TaskError {
    fn from(err: config::ConfigError) -> Self {
        TaskError::Config(err.to_string())
    }
}
