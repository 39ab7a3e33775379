//! Wire format of compensation messages.

use common::CorrelationId;
use serde::{Deserialize, Serialize};

use crate::Result;

/// The payload carried on every orchestration destination.
///
/// A small JSON envelope holding only the correlation ID; idempotent by
/// construction, so redelivery of the same message must be a no-op for any
/// consumer that already applied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationMessage {
    pub correlation_id: CorrelationId,
}

impl CompensationMessage {
    /// Creates a message for the given saga.
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self { correlation_id }
    }

    /// Encodes the message to its UTF-8 JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a message from its wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
