use std::pin::Pin;

use async_trait::async_trait;
use common::CorrelationId;
use futures_core::Stream;

use crate::record::{OrchestrationRecord, RecordSnapshot};
use crate::{RecordStoreError, Result};

/// A lazy, finite stream of record snapshots with no ordering guarantee.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<RecordSnapshot>> + Send>>;

/// Outcome of a compare-and-swap attempt.
///
/// `Conflict` and `NotFound` are expected results of races, not errors:
/// another writer advanced (or removed) the record first and the caller must
/// treat the saga as already handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The swap succeeded; the snapshot reflects the stored record.
    Updated(RecordSnapshot),

    /// The record changed since the expected snapshot was read.
    Conflict,

    /// No record exists for the correlation ID.
    NotFound,
}

impl CasOutcome {
    /// Returns true if the swap succeeded.
    pub fn is_updated(&self) -> bool {
        matches!(self, CasOutcome::Updated(_))
    }
}

/// Validates a proposed replacement against the snapshot it would replace.
///
/// Shared by all store implementations so the stage machine is enforced in
/// one place: the replacement must keep the correlation ID and must be the
/// immediate successor stage.
pub fn validate_transition(
    expected: &RecordSnapshot,
    next: &OrchestrationRecord,
) -> Result<()> {
    if expected.record.correlation_id != next.correlation_id {
        return Err(RecordStoreError::CorrelationMismatch {
            expected: expected.record.correlation_id.to_string(),
            actual: next.correlation_id.to_string(),
        });
    }
    if !expected.record.status.can_advance_to(next.status) {
        return Err(RecordStoreError::InvalidTransition {
            from: expected.record.status,
            to: next.status,
        });
    }
    Ok(())
}

/// Core trait for orchestration record stores.
///
/// All implementations must be thread-safe (Send + Sync). After creation,
/// `compare_and_swap` is the only path by which a record's status changes.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Unconditionally upserts a record.
    ///
    /// Called only by the saga initiator, which is the sole owner of the
    /// `InProgress` stage; a stale leftover record is silently overwritten.
    async fn create(&self, record: OrchestrationRecord) -> Result<()>;

    /// Fetches the current snapshot for a correlation ID.
    async fn get(&self, id: &CorrelationId) -> Result<Option<RecordSnapshot>>;

    /// Atomically replaces the record if its version is unchanged since
    /// `expected` was read.
    ///
    /// Returns `Conflict` when another writer won the race and `NotFound`
    /// when the record no longer exists; both mean "yield, this saga is
    /// already being handled". Rejects transitions that skip or reverse a
    /// stage with [`RecordStoreError::InvalidTransition`].
    async fn compare_and_swap(
        &self,
        expected: &RecordSnapshot,
        next: OrchestrationRecord,
    ) -> Result<CasOutcome>;

    /// Unconditionally removes a record. Removing an absent record is a
    /// no-op, not an error.
    async fn delete(&self, id: &CorrelationId) -> Result<()>;

    /// Streams all live records.
    ///
    /// Used exclusively by the expiration scanner. Entries observed while
    /// concurrent writers are active may be stale; the scanner's CAS
    /// discipline absorbs that.
    async fn scan_all(&self) -> Result<RecordStream>;
}
