//! Saga initiator: the forward-path adapter over the record store.

use std::time::Duration;

use channel::{CompensationMessage, EventChannel};
use common::{CorrelationId, now_millis};
use record_store::{CasOutcome, OrchestrationRecord, RecordStore, SagaStatus};

use crate::Result;

/// Opens, clears and force-fails orchestration records on behalf of the
/// originating participant.
///
/// `start` must run before any forward side effect and `finish` only after
/// every forward side effect has committed; anything left in between is the
/// expiration scanner's problem.
#[derive(Clone)]
pub struct SagaInitiator<R, C> {
    store: R,
    trigger: C,
    trigger_destination: String,
    stage_timeout: Duration,
}

impl<R, C> SagaInitiator<R, C>
where
    R: RecordStore,
    C: EventChannel,
{
    /// Creates a new initiator.
    pub fn new(
        store: R,
        trigger: C,
        trigger_destination: impl Into<String>,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            trigger,
            trigger_destination: trigger_destination.into(),
            stage_timeout,
        }
    }

    /// Opens a saga: creates the record as `InProgress` with a fresh
    /// deadline.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, id: &CorrelationId) -> Result<()> {
        let record = OrchestrationRecord::new(
            id.clone(),
            SagaStatus::InProgress,
            now_millis() + self.stage_timeout.as_millis() as i64,
        );
        self.store.create(record).await?;
        metrics::counter!("sagas_started_total").increment(1);
        Ok(())
    }

    /// Closes a successfully completed saga by removing its record.
    #[tracing::instrument(skip(self))]
    pub async fn finish(&self, id: &CorrelationId) -> Result<()> {
        self.store.delete(id).await?;
        metrics::counter!("sagas_finished_total").increment(1);
        Ok(())
    }

    /// Pushes a failed saga into compensation immediately, without waiting
    /// for its deadline to expire.
    ///
    /// Advances the record to `Rollback` via CAS and publishes the trigger.
    /// A lost CAS means the scanner or dispatcher already owns this saga and
    /// there is nothing left to do here.
    #[tracing::instrument(skip(self))]
    pub async fn force_rollback(&self, id: &CorrelationId) -> Result<()> {
        let Some(snapshot) = self.store.get(id).await? else {
            tracing::debug!(correlation_id = %id, "no record to roll back");
            return Ok(());
        };
        if snapshot.record.status != SagaStatus::InProgress {
            tracing::debug!(
                correlation_id = %id,
                status = %snapshot.record.status,
                "rollback already underway"
            );
            return Ok(());
        }

        let next = snapshot.record.advanced(
            SagaStatus::Rollback,
            now_millis() + self.stage_timeout.as_millis() as i64,
        );
        match self.store.compare_and_swap(&snapshot, next).await? {
            CasOutcome::Updated(_) => {
                self.trigger
                    .publish(
                        &self.trigger_destination,
                        &CompensationMessage::new(id.clone()),
                    )
                    .await?;
                metrics::counter!("sagas_force_rolled_back_total").increment(1);
                tracing::info!(correlation_id = %id, "saga forced into rollback");
            }
            CasOutcome::Conflict | CasOutcome::NotFound => {
                tracing::debug!(correlation_id = %id, "lost rollback race, yielding");
            }
        }
        Ok(())
    }
}
