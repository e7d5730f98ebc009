//! Integration tests for the saga orchestrator over the in-memory
//! seller network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{
    Order, OrderId, OrderItem, OrderStatus, ProductId, ReservationId, SellerId,
};
use saga::{
    InMemorySellerNetwork, SagaConfig, SagaOrchestrator, SellerApi, SellerCallError,
};
use state_store::FileStateStore;

struct TestHarness {
    network: InMemorySellerNetwork,
    orchestrator: SagaOrchestrator<InMemorySellerNetwork>,
    _dir: tempfile::TempDir,
}

impl TestHarness {
    async fn new() -> Self {
        let network = InMemorySellerNetwork::new();
        network.add_seller("seller1", [(ProductId::new("P1"), 10)]);
        network.add_seller("seller2", [(ProductId::new("P2"), 10)]);
        network.add_seller("seller3", [(ProductId::new("P3"), 10)]);

        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).await.unwrap();
        let orchestrator =
            SagaOrchestrator::new(Arc::new(network.clone()), store, SagaConfig::default());

        Self {
            network,
            orchestrator,
            _dir: dir,
        }
    }

    fn seller(&self, name: &str) -> SellerId {
        SellerId::new(name)
    }
}

#[tokio::test]
async fn test_happy_path_completes_and_keeps_no_record() {
    let h = TestHarness::new().await;
    let order = Order::new(
        "O1",
        "customer1",
        "marketplace1",
        vec![
            OrderItem::new("P1", "seller1", 5),
            OrderItem::new("P2", "seller2", 3),
        ],
    );

    let order = h.orchestrator.process_order(order).await;

    assert_eq!(order.status(), OrderStatus::Completed);
    assert_eq!(h.network.available(&h.seller("seller1"), &ProductId::new("P1")), 5);
    assert_eq!(h.network.available(&h.seller("seller2"), &ProductId::new("P2")), 7);
    assert_eq!(h.network.confirmed_count(&h.seller("seller1")), 1);
    assert_eq!(h.network.confirmed_count(&h.seller("seller2")), 1);
    assert_eq!(
        h.network.confirmed_quantity(&h.seller("seller1"), &ProductId::new("P1")),
        5
    );

    // No CANCEL was sent for a completed saga.
    assert!(h.network.cancel_log(&h.seller("seller1")).is_empty());
    assert!(h.network.cancel_log(&h.seller("seller2")).is_empty());

    // Terminal sagas keep no durable record.
    assert_eq!(h.orchestrator.store().active_count().await, 0);
}

#[tokio::test]
async fn test_partial_reserve_failure_restores_all_stock() {
    let h = TestHarness::new().await;
    let order = Order::new(
        "O2",
        "customer2",
        "marketplace1",
        vec![
            OrderItem::new("P1", "seller1", 5),
            OrderItem::new("P3", "seller3", 20), // only 10 in stock
        ],
    );

    let order = h.orchestrator.process_order(order).await;

    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(h.network.available(&h.seller("seller1"), &ProductId::new("P1")), 10);
    assert_eq!(h.network.available(&h.seller("seller3"), &ProductId::new("P3")), 10);
    assert_eq!(h.network.confirmed_count(&h.seller("seller1")), 0);
    assert_eq!(h.network.confirmed_count(&h.seller("seller3")), 0);

    // CANCEL was sent exactly for the observed reservation.
    assert_eq!(h.network.cancel_log(&h.seller("seller1")).len(), 1);
    assert!(h.network.cancel_log(&h.seller("seller3")).is_empty());

    assert_eq!(h.orchestrator.store().active_count().await, 0);
}

#[tokio::test]
async fn test_confirm_failure_triggers_full_compensation() {
    let h = TestHarness::new().await;
    // Both reservations succeed; seller1 then rejects CONFIRM as if the
    // reservation had expired.
    h.network.set_fail_confirms(&h.seller("seller1"), true);

    let order = Order::new(
        "O3",
        "customer3",
        "marketplace1",
        vec![
            OrderItem::new("P1", "seller1", 2),
            OrderItem::new("P2", "seller2", 4),
        ],
    );
    let order = h.orchestrator.process_order(order).await;

    assert_eq!(order.status(), OrderStatus::Cancelled);
    // Every observed reservation was targeted by a CANCEL.
    assert_eq!(h.network.cancel_log(&h.seller("seller1")).len(), 1);
    assert_eq!(h.network.cancel_log(&h.seller("seller2")).len(), 1);

    assert_eq!(h.network.available(&h.seller("seller1"), &ProductId::new("P1")), 10);
    assert_eq!(h.network.available(&h.seller("seller2"), &ProductId::new("P2")), 10);
    assert!(h
        .network
        .invariant_holds(&h.seller("seller2"), &ProductId::new("P2"), 10));
    assert_eq!(h.orchestrator.store().active_count().await, 0);
}

#[tokio::test]
async fn test_boundary_reservation_drives_stock_to_zero() {
    let h = TestHarness::new().await;
    let order = Order::new(
        "O4",
        "customer4",
        "marketplace1",
        vec![OrderItem::new("P1", "seller1", 10)],
    );

    let order = h.orchestrator.process_order(order).await;

    assert_eq!(order.status(), OrderStatus::Completed);
    assert_eq!(h.network.available(&h.seller("seller1"), &ProductId::new("P1")), 0);
    assert!(h
        .network
        .invariant_holds(&h.seller("seller1"), &ProductId::new("P1"), 10));
}

#[tokio::test]
async fn test_zero_quantity_item_cancels_order() {
    let h = TestHarness::new().await;
    let order = Order::new(
        "O5",
        "customer5",
        "marketplace1",
        vec![
            OrderItem::new("P1", "seller1", 0),
            OrderItem::new("P2", "seller2", 1),
        ],
    );

    let order = h.orchestrator.process_order(order).await;

    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(h.network.available(&h.seller("seller2"), &ProductId::new("P2")), 10);
}

/// Delegating seller API that delays every call, for timeout tests.
struct SlowSellers {
    inner: InMemorySellerNetwork,
    delay: Duration,
}

#[async_trait]
impl SellerApi for SlowSellers {
    async fn reserve(
        &self,
        seller_id: &SellerId,
        order_id: &OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReservationId, SellerCallError> {
        tokio::time::sleep(self.delay).await;
        self.inner
            .reserve(seller_id, order_id, product_id, quantity)
            .await
    }

    async fn confirm(
        &self,
        seller_id: &SellerId,
        reservation_id: &ReservationId,
    ) -> Result<(), SellerCallError> {
        tokio::time::sleep(self.delay).await;
        self.inner.confirm(seller_id, reservation_id).await
    }

    async fn cancel(
        &self,
        seller_id: &SellerId,
        reservation_id: &ReservationId,
    ) -> Result<(), SellerCallError> {
        // Compensation runs outside the saga deadline; keep it fast so
        // the unwind itself is observable.
        self.inner.cancel(seller_id, reservation_id).await
    }
}

#[tokio::test]
async fn test_saga_timeout_forces_compensation_and_fails_order() {
    let network = InMemorySellerNetwork::new();
    network.add_seller("seller1", [(ProductId::new("P1"), 10)]);

    let slow = SlowSellers {
        inner: network.clone(),
        delay: Duration::from_millis(80),
    };
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::open(dir.path()).await.unwrap();
    // Reserve (80ms) fits the phase deadline; the second phase pushes the
    // saga past its overall 100ms budget.
    let config = SagaConfig {
        saga_timeout: Duration::from_millis(100),
        phase_timeout: Duration::from_millis(400),
    };
    let orchestrator = SagaOrchestrator::new(Arc::new(slow), store, config);

    let order = Order::new(
        "O6",
        "customer6",
        "marketplace1",
        vec![OrderItem::new("P1", "seller1", 3)],
    );
    let order = orchestrator.process_order(order).await;

    assert_eq!(order.status(), OrderStatus::Failed);
    // The observed reservation was cancelled during forced compensation.
    assert_eq!(network.cancel_log(&SellerId::new("seller1")).len(), 1);
    assert_eq!(
        network.available(&SellerId::new("seller1"), &ProductId::new("P1")),
        10
    );
    assert_eq!(orchestrator.store().active_count().await, 0);
}

#[tokio::test]
async fn test_per_item_deadline_fails_item_and_compensates_the_rest() {
    let network = InMemorySellerNetwork::new();
    network.add_seller("seller1", [(ProductId::new("P1"), 10)]);

    let slow = SlowSellers {
        inner: network.clone(),
        delay: Duration::from_millis(120),
    };
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::open(dir.path()).await.unwrap();
    let config = SagaConfig {
        saga_timeout: Duration::from_secs(5),
        phase_timeout: Duration::from_millis(50),
    };
    let orchestrator = SagaOrchestrator::new(Arc::new(slow), store, config);

    let order = Order::new(
        "O7",
        "customer7",
        "marketplace1",
        vec![OrderItem::new("P1", "seller1", 3)],
    );
    let order = orchestrator.process_order(order).await;

    // The reserve deadline elapsed before a success was observed, so no
    // compensation is issued for it; the seller's own expiry would
    // reclaim the stock in production.
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert!(network.cancel_log(&SellerId::new("seller1")).is_empty());
}
