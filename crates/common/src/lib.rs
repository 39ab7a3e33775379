//! Shared types used across the saga orchestration crates.

pub mod time;
pub mod types;

pub use time::now_millis;
pub use types::CorrelationId;
