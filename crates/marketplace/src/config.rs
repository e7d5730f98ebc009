//! Coordinator configuration loaded from environment variables.

use std::time::Duration;

use resilience::RetryPolicy;
use saga::SagaConfig;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Coordinator configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `MARKETPLACE_ID` — this coordinator's identity (default: `"marketplace1"`)
/// - `ROUTER_PORT` — transport bind port (default: `5555`)
/// - `REQUEST_TIMEOUT_MS` — per-request timeout (default: `5000`)
/// - `SAGA_TIMEOUT_SECONDS` — per-saga overall timeout (default: `60`)
/// - `SAGA_WORKERS` — worker pool size (default: `10`)
/// - `SAGA_STATE_DIR` — saga state directory (default: `"./saga-states"`)
/// - `RETRY_MAX_ATTEMPTS` / `RETRY_BASE_DELAY_MS` /
///   `RETRY_BACKOFF_MULTIPLIER` / `RETRY_MAX_DELAY_MS` — backoff parameters
/// - `ORDER_DELAY_MS` — delay between order submissions (default: `1000`)
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    pub marketplace_id: String,
    pub router_port: u16,
    pub request_timeout: Duration,
    pub saga_timeout: Duration,
    pub workers: usize,
    pub state_dir: String,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_multiplier: f64,
    pub retry_max_delay: Duration,
    pub order_delay: Duration,
}

impl MarketplaceConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            marketplace_id: std::env::var("MARKETPLACE_ID")
                .unwrap_or_else(|_| "marketplace1".to_string()),
            router_port: env_parse("ROUTER_PORT", 5555),
            request_timeout: Duration::from_millis(env_parse("REQUEST_TIMEOUT_MS", 5000)),
            saga_timeout: Duration::from_secs(env_parse("SAGA_TIMEOUT_SECONDS", 60)),
            workers: env_parse("SAGA_WORKERS", 10),
            state_dir: std::env::var("SAGA_STATE_DIR")
                .unwrap_or_else(|_| "./saga-states".to_string()),
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 3),
            retry_base_delay: Duration::from_millis(env_parse("RETRY_BASE_DELAY_MS", 1000)),
            retry_multiplier: env_parse("RETRY_BACKOFF_MULTIPLIER", 2.0),
            retry_max_delay: Duration::from_millis(env_parse("RETRY_MAX_DELAY_MS", 30_000)),
            order_delay: Duration::from_millis(env_parse("ORDER_DELAY_MS", 1000)),
        }
    }

    /// Returns the transport bind address.
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.router_port)
    }

    /// Returns the retry policy for seller calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_max_attempts,
            base_delay: self.retry_base_delay,
            multiplier: self.retry_multiplier,
            max_delay: self.retry_max_delay,
        }
    }

    /// Returns the saga timing configuration.
    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            saga_timeout: self.saga_timeout,
            ..SagaConfig::default()
        }
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            marketplace_id: "marketplace1".to_string(),
            router_port: 5555,
            request_timeout: Duration::from_millis(5000),
            saga_timeout: Duration::from_secs(60),
            workers: 10,
            state_dir: "./saga-states".to_string(),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(1000),
            retry_multiplier: 2.0,
            retry_max_delay: Duration::from_millis(30_000),
            order_delay: Duration::from_millis(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = MarketplaceConfig::default();
        assert_eq!(config.marketplace_id, "marketplace1");
        assert_eq!(config.router_port, 5555);
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.saga_timeout, Duration::from_secs(60));
        assert_eq!(config.workers, 10);
    }

    #[test]
    fn test_bind_addr() {
        let config = MarketplaceConfig {
            router_port: 6001,
            ..MarketplaceConfig::default()
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:6001");
    }

    #[test]
    fn test_retry_policy_mirrors_config() {
        let config = MarketplaceConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
        assert_eq!(policy.max_delay, Duration::from_millis(30_000));
    }

    #[test]
    fn test_timeout_ordering_holds_for_defaults() {
        // per-request < per-phase < per-saga
        let config = MarketplaceConfig::default();
        let saga = config.saga_config();
        assert!(config.request_timeout < saga.phase_timeout);
        assert!(saga.phase_timeout < saga.saga_timeout);
    }
}
