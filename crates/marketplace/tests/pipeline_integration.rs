//! Integration tests for the order pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use common::{Order, OrderId, OrderItem, ProductId, ReservationId, SellerId};
use marketplace::OrderPipeline;
use saga::{
    InMemorySellerNetwork, SagaConfig, SagaOrchestrator, SellerApi, SellerCallError,
};
use state_store::FileStateStore;

fn order(id: &str, product: &str, seller: &str, quantity: u32) -> Order {
    Order::new(
        id,
        format!("customer-{id}"),
        "marketplace1",
        vec![OrderItem::new(product, seller, quantity)],
    )
}

async fn orchestrator_over<S: SellerApi + 'static>(
    sellers: S,
    dir: &tempfile::TempDir,
) -> Arc<SagaOrchestrator<S>> {
    let store = FileStateStore::open(dir.path()).await.unwrap();
    Arc::new(SagaOrchestrator::new(
        Arc::new(sellers),
        store,
        SagaConfig::default(),
    ))
}

fn no_shutdown() -> broadcast::Receiver<()> {
    broadcast::channel(1).1
}

#[tokio::test]
async fn test_all_orders_complete() {
    let network = InMemorySellerNetwork::new();
    network.add_seller("seller1", [(ProductId::new("P1"), 100)]);
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_over(network, &dir).await;

    let pipeline = OrderPipeline::new(
        orchestrator,
        4,
        Duration::ZERO,
        Duration::from_secs(5),
    );
    let orders = (1..=5)
        .map(|i| order(&format!("O{i}"), "P1", "seller1", 2))
        .collect();

    let summary = pipeline.run(orders, no_shutdown()).await;

    assert_eq!(summary.total, 5);
    assert_eq!(summary.submitted, 5);
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.cancelled, 0);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn test_mixed_outcomes_are_tallied() {
    let network = InMemorySellerNetwork::new();
    network.add_seller("seller1", [(ProductId::new("P1"), 5)]);
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_over(network, &dir).await;

    let pipeline = OrderPipeline::new(
        orchestrator,
        1,
        Duration::ZERO,
        Duration::from_secs(5),
    );
    // Sequential workers: the first order drains the stock, the second
    // gets rejected and compensates.
    let orders = vec![
        order("O1", "P1", "seller1", 5),
        order("O2", "P1", "seller1", 5),
    ];

    let summary = pipeline.run(orders, no_shutdown()).await;

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.failed, 0);
}

/// Seller API that tracks how many calls run concurrently.
struct ConcurrencyProbe {
    inner: InMemorySellerNetwork,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    fn new(inner: InMemorySellerNetwork) -> Self {
        Self {
            inner,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    async fn track<T>(&self, call: impl std::future::Future<Output = T>) -> T {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = call.await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl SellerApi for ConcurrencyProbe {
    async fn reserve(
        &self,
        seller_id: &SellerId,
        order_id: &OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReservationId, SellerCallError> {
        self.track(self.inner.reserve(seller_id, order_id, product_id, quantity))
            .await
    }

    async fn confirm(
        &self,
        seller_id: &SellerId,
        reservation_id: &ReservationId,
    ) -> Result<(), SellerCallError> {
        self.track(self.inner.confirm(seller_id, reservation_id)).await
    }

    async fn cancel(
        &self,
        seller_id: &SellerId,
        reservation_id: &ReservationId,
    ) -> Result<(), SellerCallError> {
        self.track(self.inner.cancel(seller_id, reservation_id)).await
    }
}

#[tokio::test]
async fn test_worker_pool_bounds_concurrency() {
    let network = InMemorySellerNetwork::new();
    network.add_seller("seller1", [(ProductId::new("P1"), 100)]);
    let probe = Arc::new(ConcurrencyProbe::new(network));

    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::open(dir.path()).await.unwrap();
    let orchestrator = Arc::new(SagaOrchestrator::new(
        Arc::clone(&probe),
        store,
        SagaConfig::default(),
    ));

    let pipeline = OrderPipeline::new(
        orchestrator,
        2,
        Duration::ZERO,
        Duration::from_secs(5),
    );
    let orders = (1..=6)
        .map(|i| order(&format!("O{i}"), "P1", "seller1", 1))
        .collect();

    let summary = pipeline.run(orders, no_shutdown()).await;

    assert_eq!(summary.completed, 6);
    // Single-item orders make one seller call at a time, so peak
    // concurrency equals the worker bound.
    assert!(probe.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_shutdown_stops_submission_and_drains() {
    let network = InMemorySellerNetwork::new();
    network.add_seller("seller1", [(ProductId::new("P1"), 100)]);
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_over(network, &dir).await;

    let pipeline = OrderPipeline::new(
        orchestrator,
        1,
        Duration::from_millis(100),
        Duration::from_secs(5),
    );
    let orders = (1..=10)
        .map(|i| order(&format!("O{i}"), "P1", "seller1", 1))
        .collect();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = shutdown_tx.send(());
    });

    let summary = pipeline.run(orders, shutdown_rx).await;

    assert!(summary.submitted < 10, "submission should stop early");
    assert_eq!(
        summary.completed + summary.cancelled + summary.failed,
        summary.submitted,
        "every submitted order reports an outcome"
    );
}
