//! Seller participant entry point.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use common::{shutdown_signal, SellerId};
use resilience::IdempotencyCache;
use seller::{Inventory, SellerConfig, SellerHandler};
use transport::{run_peer, PeerConfig};

/// Delay before redialing the coordinator after a lost connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Products every seller stocks by default.
const DEFAULT_PRODUCTS: [&str; 3] = ["P1", "P2", "P3"];

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let config = SellerConfig::from_env();
    let seller_id = SellerId::new(config.seller_id.clone());

    let inventory = Arc::new(Inventory::new(
        seller_id.clone(),
        config.reservation_timeout,
    ));
    for product in DEFAULT_PRODUCTS {
        inventory.seed(product, config.inventory_size);
    }
    tracing::info!(
        %seller_id,
        stock = ?inventory.status(),
        reservation_timeout_ms = config.reservation_timeout.as_millis() as u64,
        "seller starting"
    );

    let cache = Arc::new(IdempotencyCache::new(config.idempotency_retention));
    let handler = Arc::new(SellerHandler::new(
        seller_id.clone(),
        Arc::clone(&inventory),
        Arc::clone(&cache),
    ));

    let (shutdown_tx, _) = broadcast::channel(4);
    let sweeper = inventory.spawn_sweeper(config.cleanup_interval, shutdown_tx.subscribe());
    let cache_sweeper = cache.spawn_sweeper(config.cleanup_interval, shutdown_tx.subscribe());

    let shutting_down = Arc::new(AtomicBool::new(false));
    let signal_tx = shutdown_tx.clone();
    let signal_flag = Arc::clone(&shutting_down);
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_flag.store(true, Ordering::SeqCst);
        let _ = signal_tx.send(());
    });

    // Serve until shutdown, redialing the coordinator whenever the
    // connection is lost (including a coordinator restart).
    let mut shutdown = shutdown_tx.subscribe();
    loop {
        let peer_config = PeerConfig {
            coordinator_addr: config.marketplace_addr.clone(),
            identity: seller_id.clone(),
            heartbeat_interval: config.heartbeat_interval,
        };
        let result = run_peer(peer_config, Arc::clone(&handler), shutdown_tx.subscribe()).await;

        if shutting_down.load(Ordering::SeqCst) {
            break;
        }
        match result {
            Ok(()) => {
                tracing::info!(
                    retry_in_s = RECONNECT_DELAY.as_secs(),
                    "coordinator closed the connection, redialing"
                );
            }
            Err(error) => {
                tracing::warn!(
                    %error,
                    retry_in_s = RECONNECT_DELAY.as_secs(),
                    "connection to coordinator lost"
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.recv() => break,
        }
    }

    let _ = shutdown_tx.send(());
    let _ = sweeper.await;
    let _ = cache_sweeper.await;

    let (open, confirmed) = inventory.reservation_counts();
    tracing::info!(
        stock = ?inventory.status(),
        open_reservations = open,
        confirmed_reservations = confirmed,
        "final inventory"
    );
    tracing::debug!("final metrics:\n{}", metrics_handle.render());
    tracing::info!(%seller_id, "seller shut down");
    ExitCode::SUCCESS
}
