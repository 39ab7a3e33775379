use idempotency::GuardError;
use orchestrator::OrchestratorError;
use thiserror::Error;

use crate::money::Money;

/// Errors raised by the participant services and compensators.
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// The request (or compensation) was already processed; surfaced to the
    /// caller as a definitive failure, never retried as-is.
    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    /// The ordered product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// The charged account does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Domain invariant violation on the forward path; triggers an
    /// immediate rollback instead of a retry.
    #[error("Insufficient funds on account {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: String,
        required: Money,
        available: Money,
    },

    /// A charge already exists for this correlation ID.
    #[error("Charge already applied for correlation ID {0}")]
    DuplicateCharge(String),

    /// The participant's local store failed; safe to retry.
    #[error("Participant store error: {0}")]
    Store(String),

    /// Idempotency guard error.
    #[error("Idempotency guard error: {0}")]
    Guard(#[from] GuardError),

    /// Orchestration engine error.
    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestratorError),
}

/// Result type for participant operations.
pub type Result<T> = std::result::Result<T, ParticipantError>;
