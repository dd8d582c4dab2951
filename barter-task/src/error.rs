use thiserror::Error;

/// All errors generated in `barter-task`.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A state handler failed. Caught by the execution driver, which moves the task to
    /// [`TaskState::Error`](crate::state::TaskState::Error).
    #[error("handler failed: {0}")]
    Handler(String),

    /// The surrounding scheduler cancelled the step. Always propagated to the caller.
    #[error("task step cancelled by scheduler")]
    Cancelled,

    #[error("failed to restore task context: {0}")]
    Restore(String),

    #[error("unsupported context version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("failed to serialise task context: {0}")]
    Serialise(#[from] serde_json::Error),

    #[error("context store error: {0}")]
    Store(String),

    #[error("context store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Construct a [`TaskError::Handler`] from anything displayable.
    pub fn handler(error: impl std::fmt::Display) -> Self {
        Self::Handler(error.to_string())
    }

    /// Determines if this error is a scheduler cancellation rather than a task failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
