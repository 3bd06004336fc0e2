use thiserror::Error;
use wisp_build::BuildError;

/// Message of the transport failure raised when no result record was seen.
pub const NO_RESULT: &str = "function did not return a result";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Invalid worker name: {0:?} (expected 1-64 of [A-Za-z0-9_-])")]
    InvalidWorkerName(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Function not found: {function} (available: {available})")]
    FunctionNotFound { function: String, available: String },

    /// The isolated runtime could not be created, written to or launched.
    #[error("Session error: {0}")]
    Session(String),

    /// The result protocol broke: no record, or an unreadable one.
    #[error("{0}")]
    Transport(String),

    /// The invoked function threw.
    #[error("Function threw: {message}")]
    UserFunction { message: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Text carried by the terminal `error` event of an invocation.
    pub fn event_message(&self) -> String {
        match self {
            RuntimeError::UserFunction { message } => message.clone(),
            other => other.to_string(),
        }
    }
}
