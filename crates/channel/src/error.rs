use thiserror::Error;

/// Errors that can occur on the event channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The destination rejected the publish.
    #[error("Publish to '{destination}' failed: {reason}")]
    Publish { destination: String, reason: String },

    /// The channel (or destination) has been closed.
    #[error("Channel closed: {0}")]
    Closed(String),

    /// A message payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
