use thiserror::Error;

/// A convenience `Result` alias using [`ConclaveError`].
pub type ConclaveResult<T> = Result<T, ConclaveError>;

/// Top-level error type for the Conclave engine.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum ConclaveError {
    /// An error originating from a worker's execution loop.
    #[error("Agent error: {0}")]
    Agent(String),

    /// The completion service failed or returned unusable output.
    #[error("Completion error: {0}")]
    Completion(String),

    /// The coordinator could not produce at least one task.
    #[error("Planning error: {0}")]
    Planning(String),

    /// An error raised by the shared state store or its backing store.
    #[error("State error: {0}")]
    State(String),

    /// `restore_checkpoint` was asked for a checkpoint that does not exist.
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// `checkpoint` was asked to overwrite an existing checkpoint.
    #[error("Checkpoint already exists: {0}")]
    CheckpointExists(String),

    /// A key, checkpoint, or session name that cannot be stored safely.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// An error related to event log persistence or lookup.
    #[error("Session error: {0}")]
    Session(String),

    /// An error from the message bus.
    #[error("Channel error: {0}")]
    Channel(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the orchestration session or coordinator state machine.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConclaveError {
    /// Whether this error reports a missing checkpoint.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConclaveError::CheckpointNotFound(_))
    }
}
