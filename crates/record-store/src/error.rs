use thiserror::Error;

use crate::record::SagaStatus;

/// Errors that can occur when interacting with the record store.
///
/// A lost compare-and-swap race is deliberately *not* represented here; it
/// is an expected outcome and surfaces as [`crate::CasOutcome::Conflict`].
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// The requested status transition skips a stage or reverses.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: SagaStatus, to: SagaStatus },

    /// The replacement record carries a different correlation ID than the
    /// snapshot it is meant to replace.
    #[error("Correlation ID mismatch: expected {expected}, got {actual}")]
    CorrelationMismatch { expected: String, actual: String },

    /// A stored status string could not be parsed.
    #[error("Unknown saga status: {0}")]
    UnknownStatus(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for record store operations.
pub type Result<T> = std::result::Result<T, RecordStoreError>;
