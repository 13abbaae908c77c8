use std::path::PathBuf;
use thiserror::Error;

/// Session- and transport-level bridge failures.
///
/// A command that throws is not one of these: it is reported inside the
/// invocation outcome as a [`CommandExecutionError`].
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("failed to start script engine: {0}")]
    Engine(String),

    #[error("failed to import command module {}: {reason}", .path.display())]
    ImportFailure { path: PathBuf, reason: String },

    #[error("command module already imported into this session")]
    AlreadyInitialized,

    #[error("script session is unavailable: {0}")]
    SessionUnavailable(String),

    #[error("no pending command to invoke")]
    NoPendingCommand,

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("UI object touched off the UI thread during {0}")]
    CrossThreadViolation(String),

    #[error("UI event loop unavailable: {0}")]
    UiUnavailable(String),

    #[error("blocking bridge invocation on the UI thread would deadlock")]
    BlockingOnUiThread,

    #[error("bridge queue is full (cap={0})")]
    QueueFull(usize),

    #[error("bridge worker has stopped")]
    WorkerStopped,
}

/// An error raised by a script command while it ran.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CommandExecutionError {
    pub message: String,
    pub stack: Option<String>,
}

impl CommandExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}
