use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::guard::IdempotencyGuard;
use crate::Result;

/// In-memory idempotency guard for testing and local runs.
///
/// A single lock around the claim map makes set-if-absent atomic; expired
/// claims are collected lazily on access.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyGuard {
    claims: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InMemoryIdempotencyGuard {
    /// Creates a new guard with no claims.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of unexpired claims.
    pub fn claim_count(&self) -> usize {
        let now = Instant::now();
        self.claims
            .lock()
            .unwrap()
            .values()
            .filter(|deadline| **deadline > now)
            .count()
    }
}

#[async_trait]
impl IdempotencyGuard for InMemoryIdempotencyGuard {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }

        let now = Instant::now();
        let mut claims = self.claims.lock().unwrap();
        claims.retain(|_, deadline| *deadline > now);

        if claims.contains_key(key) {
            tracing::debug!(key, "claim rejected, already held");
            return Ok(false);
        }
        claims.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.claims.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn first_claim_wins() {
        let guard = InMemoryIdempotencyGuard::new();
        assert!(guard.claim("req-1", TTL).await.unwrap());
        assert!(!guard.claim("req-1", TTL).await.unwrap());
        assert_eq!(guard.claim_count(), 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collide() {
        let guard = InMemoryIdempotencyGuard::new();
        assert!(guard.claim("rollback:order:abc", TTL).await.unwrap());
        assert!(guard.claim("rollback:payment:abc", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn empty_key_is_always_rejected() {
        let guard = InMemoryIdempotencyGuard::new();
        assert!(!guard.claim("", TTL).await.unwrap());
        assert_eq!(guard.claim_count(), 0);
    }

    #[tokio::test]
    async fn claim_expires_after_ttl() {
        let guard = InMemoryIdempotencyGuard::new();
        assert!(guard
            .claim("req-1", Duration::from_millis(10))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(guard.claim("req-1", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_the_key() {
        let guard = InMemoryIdempotencyGuard::new();
        assert!(guard.claim("req-1", TTL).await.unwrap());
        guard.release("req-1").await.unwrap();
        assert!(guard.claim("req-1", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn release_of_unclaimed_key_is_noop() {
        let guard = InMemoryIdempotencyGuard::new();
        guard.release("ghost").await.unwrap();
        assert_eq!(guard.claim_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let guard = InMemoryIdempotencyGuard::new();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = guard.clone();
            handles.push(tokio::spawn(
                async move { guard.claim("req-1", TTL).await.unwrap() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
