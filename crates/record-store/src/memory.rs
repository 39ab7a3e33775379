use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::CorrelationId;
use tokio::sync::RwLock;

use crate::record::{OrchestrationRecord, RecordSnapshot, RecordVersion};
use crate::store::{CasOutcome, RecordStore, RecordStream, validate_transition};
use crate::Result;

/// In-memory record store implementation for testing and local runs.
///
/// Provides the same versioned compare-and-swap semantics as the PostgreSQL
/// implementation; the whole map is guarded by a single lock, so every
/// operation is trivially atomic.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<HashMap<CorrelationId, RecordSnapshot>>>,
}

impl InMemoryRecordStore {
    /// Creates a new empty in-memory record store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Removes all records.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, record: OrchestrationRecord) -> Result<()> {
        let mut records = self.records.write().await;
        // Upsert keeps the version counter monotonic so snapshots taken
        // before an overwrite can never swap against the replacement.
        let version = match records.get(&record.correlation_id) {
            Some(existing) => existing.version.next(),
            None => RecordVersion::first(),
        };
        records.insert(
            record.correlation_id.clone(),
            RecordSnapshot::new(record, version),
        );
        Ok(())
    }

    async fn get(&self, id: &CorrelationId) -> Result<Option<RecordSnapshot>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected: &RecordSnapshot,
        next: OrchestrationRecord,
    ) -> Result<CasOutcome> {
        validate_transition(expected, &next)?;

        let mut records = self.records.write().await;
        let Some(current) = records.get(expected.correlation_id()) else {
            return Ok(CasOutcome::NotFound);
        };
        if current.version != expected.version {
            return Ok(CasOutcome::Conflict);
        }

        let updated = RecordSnapshot::new(next, current.version.next());
        records.insert(expected.correlation_id().clone(), updated.clone());
        Ok(CasOutcome::Updated(updated))
    }

    async fn delete(&self, id: &CorrelationId) -> Result<()> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn scan_all(&self) -> Result<RecordStream> {
        use futures_util::stream;

        let snapshots: Vec<_> = self.records.read().await.values().cloned().collect();
        Ok(Box::pin(stream::iter(snapshots.into_iter().map(Ok))))
    }
}
