//! Saga orchestration engine.
//!
//! Coordinates a multi-service transaction through a shared orchestration
//! record: the initiator opens a record before forward work begins, the
//! expiration scanner discovers sagas that never reached a terminal state,
//! and the compensation dispatcher fans rollback instructions out to the
//! participants. The record store's compare-and-swap is the only mutation
//! discipline, so for any one correlation ID at most one of the concurrent
//! writers can advance its stage at a time.

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod initiator;
pub mod scanner;
pub mod shutdown;

pub use consumer::{ConsumerConfig, ConsumerLoop, HandlerError, MessageHandler};
pub use dispatcher::CompensationDispatcher;
pub use error::{OrchestratorError, Result};
pub use initiator::SagaInitiator;
pub use scanner::{ExpirationScanner, SweepStats};
pub use shutdown::ShutdownSignal;
