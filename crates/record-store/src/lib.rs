//! Orchestration record store.
//!
//! The record store is the shared mapping from correlation ID to saga state.
//! A record is created by the saga initiator, advanced only through
//! version-checked compare-and-swap by the expiration scanner and the
//! compensation dispatcher, and deleted once the saga reaches its terminal
//! outcome. Absence of a record is itself a valid state: the saga either
//! never started or already completed/compensated.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::CorrelationId;
pub use error::{RecordStoreError, Result};
pub use memory::InMemoryRecordStore;
pub use postgres::PostgresRecordStore;
pub use record::{OrchestrationRecord, RecordSnapshot, RecordVersion, SagaStatus};
pub use store::{CasOutcome, RecordStore, RecordStream};
