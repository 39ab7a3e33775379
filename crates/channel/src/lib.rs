//! Event channel abstraction.
//!
//! A durable, at-least-once publish/consume transport with named
//! destinations and explicit acknowledgement. A publish that returns
//! success guarantees eventual delivery to at least one consumer instance,
//! possibly more than once; consumers must be idempotent with respect to
//! redelivery. De-duplication is the consumer's job (via the idempotency
//! guard), never the channel's.

pub mod channel;
pub mod error;
pub mod memory;
pub mod message;

pub use channel::{AckToken, Delivery, DeliveryStream, EventChannel};
pub use error::{ChannelError, Result};
pub use memory::InMemoryChannel;
pub use message::CompensationMessage;
