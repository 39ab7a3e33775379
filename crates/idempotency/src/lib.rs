//! Idempotency guard.
//!
//! An atomic "claim once" primitive over a shared key space, used to
//! de-duplicate inbound client requests (by request ID) and inbound
//! compensation messages (by a namespaced rollback token). A claim is a
//! set-if-absent with a TTL; there is no read-then-write window.

pub mod error;
pub mod guard;
pub mod memory;

pub use error::{GuardError, Result};
pub use guard::IdempotencyGuard;
pub use memory::InMemoryIdempotencyGuard;
