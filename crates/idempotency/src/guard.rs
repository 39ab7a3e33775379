use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Atomic "claim once" primitive.
///
/// All implementations must be thread-safe (Send + Sync) and must make
/// `claim` a single atomic operation.
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Atomically claims `key` for `ttl` if it is not already claimed.
    ///
    /// Returns `true` when this caller acquired the claim and `false` when
    /// another caller already holds it. An empty key is always rejected.
    /// On success the key stays unavailable to other claimants until the
    /// TTL elapses or the claim is released.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Releases a claim before its TTL expires.
    ///
    /// Called by a consumer that claimed a key and then failed before
    /// committing, so a legitimate retry is not blocked until the TTL runs
    /// out. Releasing an unclaimed key is a no-op.
    async fn release(&self, key: &str) -> Result<()>;
}
