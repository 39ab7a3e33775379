use channel::ChannelError;
use record_store::RecordStoreError;
use thiserror::Error;

/// Errors that can occur inside the orchestration engine.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Record store error.
    #[error("Record store error: {0}")]
    RecordStore(#[from] RecordStoreError),

    /// Event channel error.
    #[error("Event channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
