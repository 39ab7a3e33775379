use thiserror::Error;

/// Errors that can occur while talking to the claim store.
///
/// A lost claim is not an error; `claim` returns `false` for it.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The backing store is unreachable or misbehaving.
    #[error("Claim store error: {0}")]
    Store(String),
}

/// Result type for guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
