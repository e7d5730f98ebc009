//! Marketplace coordinator entry point.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use common::{shutdown_signal, Order, OrderItem};
use marketplace::{MarketplaceConfig, OrderPipeline};
use resilience::BreakerRegistry;
use saga::{SagaOrchestrator, SellerGateway};
use state_store::FileStateStore;
use transport::MessageBroker;

/// Background flush cadence for saga state.
const PERSISTENCE_INTERVAL: Duration = Duration::from_secs(10);

/// Grace period for in-flight orders on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Deterministic order batch used when no supplier feed is wired in.
fn default_orders(marketplace_id: &str) -> Vec<Order> {
    (1..=10)
        .map(|i| {
            let item_count = 1 + (i % 3);
            let items = (0..item_count)
                .map(|j| {
                    let seller = 1 + ((i + j) % 5);
                    let product = 1 + ((i * (j + 1)) % 3);
                    let quantity = 1 + (i % 4) as u32;
                    OrderItem::new(
                        format!("P{product}"),
                        format!("seller{seller}"),
                        quantity,
                    )
                })
                .collect();
            Order::new(
                format!("O{i}"),
                format!("customer{i}"),
                marketplace_id,
                items,
            )
        })
        .collect()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let config = MarketplaceConfig::from_env();
    tracing::info!(
        marketplace_id = %config.marketplace_id,
        port = config.router_port,
        workers = config.workers,
        "marketplace coordinator starting"
    );

    // Fatal initialization errors exit non-zero: transport bind and
    // state-directory access.
    let broker = match MessageBroker::bind(&config.bind_addr(), config.request_timeout).await {
        Ok(broker) => broker,
        Err(error) => {
            tracing::error!(%error, "failed to bind transport endpoint");
            return ExitCode::FAILURE;
        }
    };
    let store = match FileStateStore::open(&config.state_dir).await {
        Ok(store) => store,
        Err(error) => {
            tracing::error!(%error, dir = %config.state_dir, "failed to open saga state directory");
            broker.shutdown();
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, _) = broadcast::channel(4);
    let flusher = store.spawn_flusher(PERSISTENCE_INTERVAL, shutdown_tx.subscribe());

    let gateway = SellerGateway::new(
        Arc::clone(&broker),
        BreakerRegistry::default(),
        config.retry_policy(),
        config.marketplace_id.clone(),
    );
    let orchestrator = Arc::new(SagaOrchestrator::new(
        Arc::new(gateway),
        Arc::clone(&store),
        config.saga_config(),
    ));

    // Drive sagas left over from a previous incarnation to a terminal
    // state before accepting new orders.
    let recovered = orchestrator.recover().await;
    if recovered > 0 {
        tracing::info!(recovered, "compensated incomplete sagas from previous run");
    }

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(());
    });

    let pipeline = OrderPipeline::new(
        Arc::clone(&orchestrator),
        config.workers,
        config.order_delay,
        SHUTDOWN_GRACE,
    );
    let orders = default_orders(&config.marketplace_id);
    let summary = pipeline.run(orders, shutdown_tx.subscribe()).await;

    let success_rate = if summary.submitted > 0 {
        100.0 * summary.completed as f64 / summary.submitted as f64
    } else {
        0.0
    };
    tracing::info!(
        total = summary.total,
        completed = summary.completed,
        cancelled = summary.cancelled,
        failed = summary.failed,
        success_rate = format!("{success_rate:.1}%"),
        "order processing summary"
    );

    // Teardown in dependency order: fail outstanding requests and tear
    // down the transport, then let the state store run its final flush.
    broker.shutdown();
    let _ = shutdown_tx.send(());
    let _ = flusher.await;

    tracing::debug!("final metrics:\n{}", metrics_handle.render());
    tracing::info!("marketplace coordinator shut down");
    ExitCode::SUCCESS
}
