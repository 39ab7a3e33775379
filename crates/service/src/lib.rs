//! Saga service: configuration and task wiring.
//!
//! Glues the orchestration engine (record store, event channel, scanner,
//! dispatcher) to the order and payment participants and runs everything as
//! background tasks under one shutdown signal.

pub mod config;
pub mod runtime;

pub use config::Config;
pub use runtime::SagaRuntime;
