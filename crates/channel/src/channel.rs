use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::message::CompensationMessage;
use crate::Result;

/// An infinite stream of deliveries from one destination.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Settles a single delivery.
///
/// Exactly one of `ack` or `nack` must be called after processing. A token
/// dropped unsettled counts as a lost consumer and the transport must
/// redeliver the message.
#[async_trait]
pub trait AckToken: Send {
    /// Acknowledges successful processing; the message will not be
    /// delivered again by this transport.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Negatively acknowledges; with `requeue` the message becomes eligible
    /// for redelivery, without it the message is dropped.
    async fn nack(self: Box<Self>, requeue: bool) -> Result<()>;
}

/// One message delivered from a destination, with its settlement token.
pub struct Delivery {
    /// Raw message payload as published.
    pub payload: Vec<u8>,

    /// Delivery attempt, starting at 1; anything above 1 is a redelivery.
    pub attempt: u32,

    /// Settlement token for this delivery.
    pub token: Box<dyn AckToken>,
}

impl Delivery {
    /// Decodes the payload as a [`CompensationMessage`].
    pub fn message(&self) -> Result<CompensationMessage> {
        CompensationMessage::from_bytes(&self.payload)
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// A durable message transport with named destinations.
///
/// Delivery is at-least-once: a successful `publish` guarantees eventual
/// delivery to at least one consumer, possibly more than once.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Publishes a message to a destination.
    async fn publish(&self, destination: &str, message: &CompensationMessage) -> Result<()>;

    /// Subscribes to a destination.
    ///
    /// Multiple subscriptions to the same destination compete for messages.
    async fn subscribe(&self, destination: &str) -> Result<DeliveryStream>;
}
