//! Orchestration record and saga status types.

use common::CorrelationId;
use serde::{Deserialize, Serialize};

/// The stage a saga is currently in.
///
/// Stage transitions:
/// ```text
/// InProgress ──► Rollback ──► RollbackInProgress ──► (record deleted)
/// ```
///
/// There is no explicit "completed" stage; a successfully finished or fully
/// compensated saga has its record removed from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Forward-path work is underway.
    InProgress,

    /// The saga missed its deadline (or failed) and must be compensated.
    Rollback,

    /// Compensation instructions are being fanned out to participants.
    RollbackInProgress,
}

impl SagaStatus {
    /// Returns true if `next` is the immediate successor of this stage.
    ///
    /// Transitions are monotonic: no stage may be skipped and none reversed.
    pub fn can_advance_to(&self, next: SagaStatus) -> bool {
        matches!(
            (self, next),
            (SagaStatus::InProgress, SagaStatus::Rollback)
                | (SagaStatus::Rollback, SagaStatus::RollbackInProgress)
        )
    }

    /// Returns the status name as stored in the record collection.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::InProgress => "IN_PROGRESS",
            SagaStatus::Rollback => "ROLLBACK",
            SagaStatus::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
        }
    }

    /// Parses a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(SagaStatus::InProgress),
            "ROLLBACK" => Some(SagaStatus::Rollback),
            "ROLLBACK_IN_PROGRESS" => Some(SagaStatus::RollbackInProgress),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A saga's orchestration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationRecord {
    /// The saga's unique external identifier.
    pub correlation_id: CorrelationId,

    /// Current saga stage.
    pub status: SagaStatus,

    /// Deadline in epoch milliseconds; past this point an `InProgress`
    /// saga is considered stuck.
    pub expires_at: i64,
}

impl OrchestrationRecord {
    /// Creates a new record.
    pub fn new(correlation_id: CorrelationId, status: SagaStatus, expires_at: i64) -> Self {
        Self {
            correlation_id,
            status,
            expires_at,
        }
    }

    /// Returns true if the record's deadline has passed.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }

    /// Builds the successor record for the next stage with a fresh deadline.
    ///
    /// Every stage transition refreshes `expires_at`, giving each stage its
    /// own timeout budget.
    pub fn advanced(&self, status: SagaStatus, expires_at: i64) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            status,
            expires_at,
        }
    }
}

/// Monotonic per-record version used for optimistic concurrency.
///
/// The version is owned by the store: it starts at 1 when a record is
/// created and increments on every successful write. Callers never fabricate
/// one; they only hand back the version they read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordVersion(i64);

impl RecordVersion {
    /// The version assigned to a freshly created record.
    pub fn first() -> Self {
        Self(1)
    }

    /// Creates a version from a raw value (store implementations only).
    pub fn new(v: i64) -> Self {
        Self(v)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version number.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record together with the version at which it was read.
///
/// This is the unit a caller must hand back to
/// [`crate::RecordStore::compare_and_swap`]: the swap succeeds only if the
/// stored version still matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSnapshot {
    pub record: OrchestrationRecord,
    pub version: RecordVersion,
}

impl RecordSnapshot {
    /// Creates a snapshot (store implementations only).
    pub fn new(record: OrchestrationRecord, version: RecordVersion) -> Self {
        Self { record, version }
    }

    /// Returns the record's correlation ID.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.record.correlation_id
    }
}
