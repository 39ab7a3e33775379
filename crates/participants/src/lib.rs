//! Saga participants.
//!
//! Each participant owns its local entities (order rows, account balances,
//! the transaction ledger) behind a transactional store trait, exposes the
//! forward-path service the client calls, and runs a compensator that
//! undoes local effects when a rollback message arrives on its dedicated
//! destination. The orchestration core never touches these entities
//! directly.

pub mod error;
pub mod money;
pub mod order;
pub mod payment;

pub use error::{ParticipantError, Result};
pub use money::Money;
pub use order::{
    InMemoryOrderStore, Order, OrderCompensator, OrderRequest, OrderService, OrderStore,
};
pub use payment::{
    ChargeRequest, InMemoryPaymentStore, LedgerEntry, PaymentCompensator, PaymentGateway,
    PaymentProcessor, PaymentStore, ReversalOutcome,
};
