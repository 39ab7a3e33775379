//! Generic consume loop with a bounded worker pool.
//!
//! One loop per destination pulls deliveries from the subscription and feeds
//! a bounded queue; a fixed set of workers decode and handle them. The
//! bounded queue is the backpressure point: when every worker is busy and
//! the queue is full, the loop stops pulling and the transport holds the
//! backlog.

use std::sync::Arc;

use channel::{CompensationMessage, Delivery, EventChannel};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::shutdown::ShutdownSignal;
use crate::Result;

/// Error type handlers may return; anything that converts into a boxed
/// error works, so participant crates can use their own error enums.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Processes one decoded compensation message.
///
/// Returning `Ok` acknowledges the delivery; returning `Err` negatively
/// acknowledges it with requeue, so the transport redelivers. Handlers must
/// be idempotent: at-least-once delivery makes duplicates a certainty.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Handles a single message.
    async fn handle(&self, message: CompensationMessage) -> std::result::Result<(), HandlerError>;
}

/// Sizing for one consumer loop.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Destination to subscribe to.
    pub destination: String,
    /// Number of worker tasks.
    pub workers: usize,
    /// Capacity of the internal delivery queue.
    pub queue_capacity: usize,
}

impl ConsumerConfig {
    /// Creates a config with the given destination and default sizing.
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            workers: 4,
            queue_capacity: 16,
        }
    }

    /// Sets the worker count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the internal queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// Long-lived consumer of one destination.
pub struct ConsumerLoop<C, H> {
    channel: C,
    handler: Arc<H>,
    config: ConsumerConfig,
}

impl<C, H> ConsumerLoop<C, H>
where
    C: EventChannel,
    H: MessageHandler,
{
    /// Creates a new consumer loop.
    pub fn new(channel: C, handler: H, config: ConsumerConfig) -> Self {
        Self {
            channel,
            handler: Arc::new(handler),
            config,
        }
    }

    /// Subscribes and processes deliveries until shutdown.
    ///
    /// On shutdown the loop stops pulling and releases its subscription;
    /// workers finish the queued backlog and exit. Deliveries the transport
    /// still holds are redelivered to the next subscriber.
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<()> {
        use futures_util::StreamExt;

        let mut subscription = self.channel.subscribe(&self.config.destination).await?;
        let (tx, rx) = mpsc::channel::<Delivery>(self.config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.config.workers {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&self.handler);
            workers.spawn(async move { worker_loop(rx, handler).await });
        }

        tracing::info!(
            handler = self.handler.name(),
            destination = %self.config.destination,
            workers = self.config.workers,
            "consumer started"
        );

        loop {
            tokio::select! {
                delivery = subscription.next() => {
                    match delivery {
                        // The send blocks when the queue is full; that is
                        // the backpressure against slow downstream stores.
                        Some(delivery) => {
                            if tx.send(delivery).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                () = shutdown.triggered() => break,
            }
        }

        drop(subscription);
        drop(tx);
        while workers.join_next().await.is_some() {}

        tracing::info!(
            handler = self.handler.name(),
            destination = %self.config.destination,
            "consumer shut down"
        );
        Ok(())
    }
}

async fn worker_loop<H: MessageHandler>(
    rx: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    handler: Arc<H>,
) {
    loop {
        // Hold the lock only while waiting for the next delivery.
        let delivery = rx.lock().await.recv().await;
        let Some(delivery) = delivery else {
            return;
        };

        let message = match delivery.message() {
            Ok(message) => message,
            Err(e) => {
                // A payload that cannot be decoded will never decode; drop
                // it instead of requeueing forever.
                tracing::warn!(handler = handler.name(), error = %e, "dropping undecodable message");
                metrics::counter!("consumer_poison_messages_total", "handler" => handler.name())
                    .increment(1);
                let _ = delivery.token.nack(false).await;
                continue;
            }
        };

        let correlation_id = message.correlation_id.clone();
        match handler.handle(message).await {
            Ok(()) => {
                metrics::counter!("consumer_messages_total", "handler" => handler.name())
                    .increment(1);
                if let Err(e) = delivery.token.ack().await {
                    tracing::warn!(handler = handler.name(), error = %e, "ack failed");
                }
            }
            Err(e) => {
                metrics::counter!("consumer_failures_total", "handler" => handler.name())
                    .increment(1);
                tracing::warn!(
                    handler = handler.name(),
                    correlation_id = %correlation_id,
                    error = %e,
                    "handler failed, requeueing"
                );
                if let Err(e) = delivery.token.nack(true).await {
                    tracing::warn!(handler = handler.name(), error = %e, "nack failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel::InMemoryChannel;
    use common::CorrelationId;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct RecordingHandler {
        seen: Arc<StdMutex<Vec<String>>>,
        fail_first_attempt: Arc<StdMutex<bool>>,
    }

    impl RecordingHandler {
        fn new() -> (Self, Arc<StdMutex<Vec<String>>>) {
            let seen = Arc::new(StdMutex::new(Vec::new()));
            (
                Self {
                    seen: Arc::clone(&seen),
                    fail_first_attempt: Arc::new(StdMutex::new(false)),
                },
                seen,
            )
        }
    }

    #[async_trait::async_trait]
    impl MessageHandler for RecordingHandler {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn handle(
            &self,
            message: CompensationMessage,
        ) -> std::result::Result<(), HandlerError> {
            let mut fail = self.fail_first_attempt.lock().unwrap();
            if *fail {
                *fail = false;
                return Err("transient failure".into());
            }
            drop(fail);
            self.seen
                .lock()
                .unwrap()
                .push(message.correlation_id.to_string());
            Ok(())
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn delivers_messages_to_handler() {
        let channel = InMemoryChannel::new();
        let (handler, seen) = RecordingHandler::new();
        let consumer = ConsumerLoop::new(channel.clone(), handler, ConsumerConfig::new("q"));
        let shutdown = ShutdownSignal::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(shutdown).await })
        };

        for i in 0..5 {
            channel
                .publish("q", &CompensationMessage::new(CorrelationId::new(format!("m{i}"))))
                .await
                .unwrap();
        }

        wait_for(|| seen.lock().unwrap().len() == 5).await;
        shutdown.trigger();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_message_is_redelivered() {
        let channel = InMemoryChannel::new();
        let (handler, seen) = RecordingHandler::new();
        *handler.fail_first_attempt.lock().unwrap() = true;
        let consumer = ConsumerLoop::new(channel.clone(), handler, ConsumerConfig::new("q"));
        let shutdown = ShutdownSignal::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(shutdown).await })
        };

        channel
            .publish("q", &CompensationMessage::new(CorrelationId::new("abc")))
            .await
            .unwrap();

        // First attempt fails and is requeued; the retry lands.
        wait_for(|| seen.lock().unwrap().len() == 1).await;
        shutdown.trigger();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_finishes_backlog_and_joins_workers() {
        let channel = InMemoryChannel::new();
        let (handler, seen) = RecordingHandler::new();
        let consumer = ConsumerLoop::new(
            channel.clone(),
            handler,
            ConsumerConfig::new("q").workers(2).queue_capacity(2),
        );
        let shutdown = ShutdownSignal::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(shutdown).await })
        };

        channel
            .publish("q", &CompensationMessage::new(CorrelationId::new("abc")))
            .await
            .unwrap();
        wait_for(|| seen.lock().unwrap().len() == 1).await;

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn undecodable_payload_is_dropped_not_requeued() {
        let channel = InMemoryChannel::new();
        let (handler, seen) = RecordingHandler::new();
        let consumer = ConsumerLoop::new(channel.clone(), handler, ConsumerConfig::new("q"));
        let shutdown = ShutdownSignal::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(shutdown).await })
        };

        channel.publish_raw("q", b"not json".to_vec());
        channel
            .publish("q", &CompensationMessage::new(CorrelationId::new("good")))
            .await
            .unwrap();

        // The good message still lands; the poison one is gone for good.
        wait_for(|| seen.lock().unwrap().len() == 1).await;
        assert_eq!(channel.queue_depth("q"), 0);
        shutdown.trigger();
        task.await.unwrap().unwrap();
    }
}
