//! Expiration scanner: the timeout-driven recovery loop.

use std::time::Duration;

use channel::{CompensationMessage, EventChannel};
use common::now_millis;
use futures_util::StreamExt;
use record_store::{CasOutcome, RecordSnapshot, RecordStore, SagaStatus};
use tokio::time::MissedTickBehavior;

use crate::shutdown::ShutdownSignal;
use crate::Result;

/// Periodically sweeps the record store for sagas past their deadline and
/// pushes them toward compensation.
///
/// Polling beats per-record timers here: one sweep covers every way a saga
/// can get stuck (crash, lost message, slow participant) and keeps no state
/// between ticks.
#[derive(Clone)]
pub struct ExpirationScanner<R, C> {
    store: R,
    channel: C,
    trigger_destination: String,
    interval: Duration,
    stage_timeout: Duration,
}

/// Counters from a single sweep, mainly for tests and logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Records enumerated.
    pub scanned: usize,
    /// Expired `InProgress` records transitioned to `Rollback`.
    pub expired: usize,
    /// Expired `Rollback` records whose trigger was published again.
    pub retriggered: usize,
    /// CAS attempts lost to a concurrent writer.
    pub conflicts: usize,
    /// Records skipped because of a per-record error.
    pub errors: usize,
}

impl<R, C> ExpirationScanner<R, C>
where
    R: RecordStore,
    C: EventChannel,
{
    /// Creates a new scanner.
    pub fn new(
        store: R,
        channel: C,
        trigger_destination: impl Into<String>,
        interval: Duration,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            channel,
            trigger_destination: trigger_destination.into(),
            interval,
            stage_timeout,
        }
    }

    /// Runs sweeps on the configured interval until shutdown.
    pub async fn run(&self, shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        // A failed enumeration is transient; the next tick retries.
                        tracing::warn!(error = %e, "sweep aborted");
                    }
                }
                () = shutdown.triggered() => {
                    tracing::info!("expiration scanner shutting down");
                    return;
                }
            }
        }
    }

    /// Enumerates all records once and expires the stuck ones.
    ///
    /// A single record's failure never aborts the sweep; errors are logged
    /// and counted.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepStats> {
        let now = now_millis();
        let mut stats = SweepStats::default();
        let mut stream = self.store.scan_all().await?;

        while let Some(result) = stream.next().await {
            let snapshot = match result {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable record");
                    stats.errors += 1;
                    continue;
                }
            };
            stats.scanned += 1;

            if !snapshot.record.is_expired(now) {
                continue;
            }

            match snapshot.record.status {
                SagaStatus::InProgress => match self.expire(&snapshot, now).await {
                    Ok(true) => stats.expired += 1,
                    Ok(false) => stats.conflicts += 1,
                    Err(e) => {
                        tracing::warn!(
                            correlation_id = %snapshot.correlation_id(),
                            error = %e,
                            "failed to expire record"
                        );
                        stats.errors += 1;
                    }
                },
                // A Rollback record past its own deadline means the trigger
                // was lost (publish failed or the dispatcher never saw it).
                // Publishing again is safe: the dispatcher absorbs duplicates.
                SagaStatus::Rollback => match self.publish_trigger(&snapshot).await {
                    Ok(()) => stats.retriggered += 1,
                    Err(e) => {
                        tracing::warn!(
                            correlation_id = %snapshot.correlation_id(),
                            error = %e,
                            "failed to re-publish rollback trigger"
                        );
                        stats.errors += 1;
                    }
                },
                SagaStatus::RollbackInProgress => {}
            }
        }

        metrics::counter!("scanner_sweeps_total").increment(1);
        metrics::counter!("sagas_expired_total").increment(stats.expired as u64);
        if stats.expired > 0 || stats.retriggered > 0 {
            tracing::info!(
                scanned = stats.scanned,
                expired = stats.expired,
                retriggered = stats.retriggered,
                conflicts = stats.conflicts,
                "sweep found stuck sagas"
            );
        }
        Ok(stats)
    }

    /// CASes one expired record to `Rollback` and publishes its trigger.
    ///
    /// Returns false when a concurrent writer won; that saga is already
    /// being handled.
    async fn expire(&self, snapshot: &RecordSnapshot, now: i64) -> Result<bool> {
        let next = snapshot
            .record
            .advanced(SagaStatus::Rollback, now + self.stage_timeout.as_millis() as i64);

        match self.store.compare_and_swap(snapshot, next).await? {
            CasOutcome::Updated(_) => {
                tracing::info!(
                    correlation_id = %snapshot.correlation_id(),
                    "expired saga set to ROLLBACK"
                );
                self.publish_trigger(snapshot).await?;
                Ok(true)
            }
            CasOutcome::Conflict | CasOutcome::NotFound => Ok(false),
        }
    }

    async fn publish_trigger(&self, snapshot: &RecordSnapshot) -> Result<()> {
        self.channel
            .publish(
                &self.trigger_destination,
                &CompensationMessage::new(snapshot.correlation_id().clone()),
            )
            .await?;
        Ok(())
    }
}
