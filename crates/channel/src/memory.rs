use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::channel::{AckToken, Delivery, DeliveryStream, EventChannel};
use crate::message::CompensationMessage;
use crate::{ChannelError, Result};

/// In-memory event channel for testing and local runs.
///
/// Each destination is an unbounded queue with competing consumers. The
/// at-least-once contract is honored through the settlement tokens: a
/// delivery whose token is nacked with requeue, or dropped unsettled,
/// goes back on the queue and is delivered again.
#[derive(Clone, Default)]
pub struct InMemoryChannel {
    destinations: Arc<Mutex<HashMap<String, Arc<DestinationQueue>>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryChannel {
    /// Creates a new channel with no destinations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures publishes to `destination` to fail until cleared.
    ///
    /// Test hook for exercising partial fan-out handling.
    pub fn set_fail_publish(&self, destination: &str, fail: bool) {
        let mut failing = self.failing.lock().unwrap();
        if fail {
            failing.insert(destination.to_string());
        } else {
            failing.remove(destination);
        }
    }

    /// Publishes raw bytes, bypassing the message envelope.
    ///
    /// Test hook for exercising poison-message handling in consumers.
    pub fn publish_raw(&self, destination: &str, payload: Vec<u8>) {
        self.destination(destination).push_back(PendingMessage {
            payload,
            attempts: 0,
        });
    }

    /// Number of messages currently queued (not in flight) on a destination.
    pub fn queue_depth(&self, destination: &str) -> usize {
        self.destinations
            .lock()
            .unwrap()
            .get(destination)
            .map_or(0, |queue| queue.depth())
    }

    fn destination(&self, name: &str) -> Arc<DestinationQueue> {
        let mut destinations = self.destinations.lock().unwrap();
        destinations
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DestinationQueue::default()))
            .clone()
    }
}

#[async_trait]
impl EventChannel for InMemoryChannel {
    async fn publish(&self, destination: &str, message: &CompensationMessage) -> Result<()> {
        if self.failing.lock().unwrap().contains(destination) {
            return Err(ChannelError::Publish {
                destination: destination.to_string(),
                reason: "destination unavailable".to_string(),
            });
        }

        let payload = message.to_bytes()?;
        self.destination(destination).push_back(PendingMessage {
            payload,
            attempts: 0,
        });
        tracing::trace!(destination, correlation_id = %message.correlation_id, "message published");
        Ok(())
    }

    async fn subscribe(&self, destination: &str) -> Result<DeliveryStream> {
        use futures_util::stream;

        let queue = self.destination(destination);
        let stream = stream::unfold(queue, |queue| async move {
            let delivery = queue.next_delivery().await;
            Some((delivery, queue))
        });
        Ok(Box::pin(stream))
    }
}

struct PendingMessage {
    payload: Vec<u8>,
    attempts: u32,
}

#[derive(Default)]
struct DestinationQueue {
    ready: Mutex<VecDeque<PendingMessage>>,
    notify: Notify,
}

impl DestinationQueue {
    fn depth(&self) -> usize {
        self.ready.lock().unwrap().len()
    }

    fn push_back(&self, message: PendingMessage) {
        self.ready.lock().unwrap().push_back(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<PendingMessage> {
        self.ready.lock().unwrap().pop_front()
    }

    async fn next_delivery(self: &Arc<Self>) -> Delivery {
        loop {
            // Register for wakeup before checking, so a publish racing with
            // the check cannot be missed.
            let notified = self.notify.notified();
            if let Some(mut message) = self.pop() {
                message.attempts += 1;
                return Delivery {
                    payload: message.payload.clone(),
                    attempt: message.attempts,
                    token: Box::new(InMemoryAckToken {
                        queue: Arc::clone(self),
                        message: Some(message),
                    }),
                };
            }
            notified.await;
        }
    }
}

/// Settlement token for the in-memory channel.
///
/// Holds the undelivered message itself; dropping the token unsettled puts
/// the message back on the queue, which models broker redelivery after a
/// consumer crash or connection loss.
struct InMemoryAckToken {
    queue: Arc<DestinationQueue>,
    message: Option<PendingMessage>,
}

#[async_trait]
impl AckToken for InMemoryAckToken {
    async fn ack(mut self: Box<Self>) -> Result<()> {
        self.message.take();
        Ok(())
    }

    async fn nack(mut self: Box<Self>, requeue: bool) -> Result<()> {
        if let Some(message) = self.message.take()
            && requeue
        {
            self.queue.push_back(message);
        }
        Ok(())
    }
}

impl Drop for InMemoryAckToken {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.queue.push_back(message);
        }
    }
}
