//! Service configuration loaded from environment variables.

use std::time::Duration;

/// Runtime configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SCAN_INTERVAL_MS` — expiration scanner sweep interval (default: `1000`)
/// - `STAGE_TIMEOUT_MS` — per-stage saga deadline (default: `30000`)
/// - `CLAIM_TTL_MS` — idempotency claim lifetime (default: `60000`)
/// - `CONSUMER_WORKERS` — workers per consumer loop (default: `4`)
/// - `CONSUMER_QUEUE_CAPACITY` — per-loop delivery queue size (default: `16`)
/// - `TRIGGER_DESTINATION` — rollback trigger destination (default: `"rollback.trigger"`)
/// - `ORDER_DESTINATION` — order compensation destination (default: `"rollback.order"`)
/// - `PAYMENT_DESTINATION` — payment compensation destination (default: `"rollback.payment"`)
/// - `DATABASE_URL` — when set, records live in PostgreSQL instead of memory
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub scan_interval_ms: u64,
    pub stage_timeout_ms: u64,
    pub claim_ttl_ms: u64,
    pub consumer_workers: usize,
    pub consumer_queue_capacity: usize,
    pub trigger_destination: String,
    pub order_destination: String,
    pub payment_destination: String,
    pub database_url: Option<String>,
    pub log_level: String,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            scan_interval_ms: env_parsed("SCAN_INTERVAL_MS", 1_000),
            stage_timeout_ms: env_parsed("STAGE_TIMEOUT_MS", 30_000),
            claim_ttl_ms: env_parsed("CLAIM_TTL_MS", 60_000),
            consumer_workers: env_parsed("CONSUMER_WORKERS", 4),
            consumer_queue_capacity: env_parsed("CONSUMER_QUEUE_CAPACITY", 16),
            trigger_destination: env_string("TRIGGER_DESTINATION", "rollback.trigger"),
            order_destination: env_string("ORDER_DESTINATION", "rollback.order"),
            payment_destination: env_string("PAYMENT_DESTINATION", "rollback.payment"),
            database_url: std::env::var("DATABASE_URL").ok(),
            log_level: env_string("RUST_LOG", "info"),
        }
    }

    /// Scanner sweep interval.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Per-stage saga deadline.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// Idempotency claim lifetime.
    pub fn claim_ttl(&self) -> Duration {
        Duration::from_millis(self.claim_ttl_ms)
    }

    /// Destinations the dispatcher fans compensation out to.
    pub fn participant_destinations(&self) -> Vec<String> {
        vec![
            self.order_destination.clone(),
            self.payment_destination.clone(),
        ]
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_interval_ms: 1_000,
            stage_timeout_ms: 30_000,
            claim_ttl_ms: 60_000,
            consumer_workers: 4,
            consumer_queue_capacity: 16,
            trigger_destination: "rollback.trigger".to_string(),
            order_destination: "rollback.order".to_string(),
            payment_destination: "rollback.payment".to_string(),
            database_url: None,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.scan_interval(), Duration::from_secs(1));
        assert_eq!(config.stage_timeout(), Duration::from_secs(30));
        assert_eq!(config.claim_ttl(), Duration::from_secs(60));
        assert_eq!(config.consumer_workers, 4);
    }

    #[test]
    fn test_participant_destinations_order() {
        let config = Config::default();
        assert_eq!(
            config.participant_destinations(),
            vec!["rollback.order".to_string(), "rollback.payment".to_string()]
        );
    }
}
