//! Seller configuration loaded from environment variables.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Seller configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SELLER_ID` — stable seller identity (default: `"seller1"`)
/// - `MARKETPLACE_ADDR` — coordinator front-end (default: `"127.0.0.1:5555"`)
/// - `SELLER_INVENTORY_SIZE` — initial stock per product (default: `50`)
/// - `RESERVATION_TIMEOUT_MS` — reservation expiry (default: `300000`)
/// - `CLEANUP_INTERVAL_SECONDS` — expiry sweep cadence (default: `60`)
/// - `IDEMPOTENCY_RETENTION_MS` — dedup window (default: `1800000`)
/// - `HEARTBEAT_INTERVAL_SECONDS` — heartbeat cadence (default: `30`)
#[derive(Debug, Clone)]
pub struct SellerConfig {
    pub seller_id: String,
    pub marketplace_addr: String,
    pub inventory_size: u32,
    pub reservation_timeout: Duration,
    pub cleanup_interval: Duration,
    pub idempotency_retention: Duration,
    pub heartbeat_interval: Duration,
}

impl SellerConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            seller_id: std::env::var("SELLER_ID").unwrap_or_else(|_| "seller1".to_string()),
            marketplace_addr: std::env::var("MARKETPLACE_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:5555".to_string()),
            inventory_size: env_parse("SELLER_INVENTORY_SIZE", 50),
            reservation_timeout: Duration::from_millis(env_parse(
                "RESERVATION_TIMEOUT_MS",
                300_000,
            )),
            cleanup_interval: Duration::from_secs(env_parse("CLEANUP_INTERVAL_SECONDS", 60)),
            idempotency_retention: Duration::from_millis(env_parse(
                "IDEMPOTENCY_RETENTION_MS",
                1_800_000,
            )),
            heartbeat_interval: Duration::from_secs(env_parse("HEARTBEAT_INTERVAL_SECONDS", 30)),
        }
    }
}

impl Default for SellerConfig {
    fn default() -> Self {
        Self {
            seller_id: "seller1".to_string(),
            marketplace_addr: "127.0.0.1:5555".to_string(),
            inventory_size: 50,
            reservation_timeout: Duration::from_millis(300_000),
            cleanup_interval: Duration::from_secs(60),
            idempotency_retention: Duration::from_millis(1_800_000),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}
