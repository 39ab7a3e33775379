//! Compensation dispatcher: fans rollback decisions out to participants.

use std::time::Duration;

use channel::{CompensationMessage, EventChannel};
use common::now_millis;
use record_store::{CasOutcome, RecordStore, SagaStatus};

use crate::consumer::{HandlerError, MessageHandler};

/// Consumes rollback triggers and turns each into one compensation message
/// per participant destination.
///
/// Per-participant destinations, never a shared queue: each participant's
/// compensator only ever sees messages meant for it.
#[derive(Clone)]
pub struct CompensationDispatcher<R, C> {
    store: R,
    channel: C,
    participant_destinations: Vec<String>,
    stage_timeout: Duration,
}

impl<R, C> CompensationDispatcher<R, C>
where
    R: RecordStore,
    C: EventChannel,
{
    /// Creates a new dispatcher fanning out to the given destinations.
    pub fn new(
        store: R,
        channel: C,
        participant_destinations: Vec<String>,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            channel,
            participant_destinations,
            stage_timeout,
        }
    }

    /// Publishes the compensation message to every participant destination.
    ///
    /// Any failure aborts with an error so the trigger is requeued; partial
    /// fan-out must never be treated as success. Re-publishing to a
    /// destination that already got the message is harmless, compensators
    /// are idempotent.
    async fn fan_out(&self, message: &CompensationMessage) -> Result<(), HandlerError> {
        for destination in &self.participant_destinations {
            self.channel.publish(destination, message).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<R, C> MessageHandler for CompensationDispatcher<R, C>
where
    R: RecordStore + 'static,
    C: EventChannel + 'static,
{
    fn name(&self) -> &'static str {
        "compensation_dispatcher"
    }

    #[tracing::instrument(skip(self), fields(correlation_id = %message.correlation_id))]
    async fn handle(&self, message: CompensationMessage) -> Result<(), HandlerError> {
        let id = &message.correlation_id;

        let Some(snapshot) = self.store.get(id).await? else {
            tracing::debug!("record gone, trigger already handled");
            return Ok(());
        };

        match snapshot.record.status {
            // Stale or duplicate trigger: the saga is still running (or a
            // fresh saga reused the ID). Nothing to dispatch.
            SagaStatus::InProgress => {
                tracing::debug!("record not in ROLLBACK, skipping trigger");
                return Ok(());
            }
            SagaStatus::Rollback => {
                let next = snapshot.record.advanced(
                    SagaStatus::RollbackInProgress,
                    now_millis() + self.stage_timeout.as_millis() as i64,
                );
                match self.store.compare_and_swap(&snapshot, next).await? {
                    CasOutcome::Updated(_) => {}
                    CasOutcome::Conflict | CasOutcome::NotFound => {
                        tracing::debug!("lost dispatch race, yielding");
                        return Ok(());
                    }
                }
            }
            // A redelivered trigger after a partial fan-out: the stage was
            // already advanced, so resume straight at the fan-out.
            SagaStatus::RollbackInProgress => {
                tracing::debug!("resuming interrupted fan-out");
            }
        }

        self.fan_out(&message).await?;

        // Delete only after every publish succeeded; a failure above leaves
        // the record in RollbackInProgress and requeues the trigger.
        self.store.delete(id).await?;
        metrics::counter!("rollbacks_dispatched_total").increment(1);
        tracing::info!("compensation dispatched to all participants");
        Ok(())
    }
}
