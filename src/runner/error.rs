use thiserror::Error;

use crate::shared::inference::InferenceError;
use crate::shared::process::ProcessError;
use crate::shared::workspace::WorkspaceError;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid task: {0}")]
    InvalidArgument(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Could not classify task: {0}")]
    Unresolved(String),

    #[error("Generated code failed validation: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Errors the caller can fix by changing the task or the inputs.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TaskError::NotFound(_) | TaskError::InvalidArgument(_) | TaskError::Unresolved(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;

impl From<WorkspaceError> for TaskError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::Missing(path) => TaskError::NotFound(path),
            WorkspaceError::Escape(path) => {
                TaskError::InvalidArgument(format!("path '{path}' is outside the working directory"))
            }
            WorkspaceError::Io { source, .. } => TaskError::Io(source),
        }
    }
}

impl From<ProcessError> for TaskError {
    fn from(err: ProcessError) -> Self {
        TaskError::Upstream(err.to_string())
    }
}

impl From<InferenceError> for TaskError {
    fn from(err: InferenceError) -> Self {
        TaskError::Upstream(err.to_string())
    }
}

impl From<reqwest::Error> for TaskError {
    fn from(err: reqwest::Error) -> Self {
        TaskError::Upstream(err.to_string())
    }
}

impl From<sqlx::Error> for TaskError {
    fn from(err: sqlx::Error) -> Self {
        TaskError::Upstream(format!("database error: {err}"))
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::InvalidArgument(format!("invalid JSON: {err}"))
    }
}
