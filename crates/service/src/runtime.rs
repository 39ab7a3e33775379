//! Background task wiring for the saga runtime.

use channel::EventChannel;
use orchestrator::{
    CompensationDispatcher, ConsumerConfig, ConsumerLoop, ExpirationScanner, MessageHandler,
    ShutdownSignal,
};
use record_store::RecordStore;
use tokio::task::JoinHandle;

use crate::Config;

/// Handle over the spawned orchestration tasks.
///
/// One expiration scanner, one dispatcher consumer on the trigger
/// destination, and one consumer loop per participant compensator.
pub struct SagaRuntime {
    shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl SagaRuntime {
    /// Spawns the scanner, the dispatcher and both compensator consumers.
    pub fn spawn<R, C, HO, HP>(
        config: &Config,
        store: R,
        channel: C,
        order_compensator: HO,
        payment_compensator: HP,
    ) -> Self
    where
        R: RecordStore + Clone + 'static,
        C: EventChannel + Clone + 'static,
        HO: MessageHandler,
        HP: MessageHandler,
    {
        let shutdown = ShutdownSignal::new();
        let mut tasks = Vec::new();

        let scanner = ExpirationScanner::new(
            store.clone(),
            channel.clone(),
            &config.trigger_destination,
            config.scan_interval(),
            config.stage_timeout(),
        );
        tasks.push(tokio::spawn({
            let shutdown = shutdown.clone();
            async move { scanner.run(shutdown).await }
        }));

        let dispatcher = CompensationDispatcher::new(
            store,
            channel.clone(),
            config.participant_destinations(),
            config.stage_timeout(),
        );
        tasks.push(Self::spawn_consumer(
            channel.clone(),
            dispatcher,
            config.consumer_config(&config.trigger_destination),
            shutdown.clone(),
        ));
        tasks.push(Self::spawn_consumer(
            channel.clone(),
            order_compensator,
            config.consumer_config(&config.order_destination),
            shutdown.clone(),
        ));
        tasks.push(Self::spawn_consumer(
            channel,
            payment_compensator,
            config.consumer_config(&config.payment_destination),
            shutdown.clone(),
        ));

        Self { shutdown, tasks }
    }

    fn spawn_consumer<C, H>(
        channel: C,
        handler: H,
        config: ConsumerConfig,
        shutdown: ShutdownSignal,
    ) -> JoinHandle<()>
    where
        C: EventChannel + 'static,
        H: MessageHandler,
    {
        let consumer = ConsumerLoop::new(channel, handler, config);
        tokio::spawn(async move {
            if let Err(e) = consumer.run(shutdown).await {
                tracing::error!(error = %e, "consumer loop failed");
            }
        })
    }

    /// Returns a clone of the runtime's shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Triggers shutdown and waits for every task to exit.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "runtime task panicked");
            }
        }
    }
}

impl Config {
    fn consumer_config(&self, destination: &str) -> ConsumerConfig {
        ConsumerConfig::new(destination)
            .workers(self.consumer_workers)
            .queue_capacity(self.consumer_queue_capacity)
    }
}
