//! Crash-recovery tests: sagas recovered from disk are driven to a
//! terminal state by compensation.

use std::sync::Arc;

use common::{OrderId, ProductId, ReservationId, SagaId, SagaState, SellerId};
use saga::{InMemorySellerNetwork, SagaConfig, SagaOrchestrator};
use state_store::{CompensationRecord, FileStateStore, SagaSnapshot};

async fn orchestrator_over(
    network: &InMemorySellerNetwork,
    store: Arc<FileStateStore>,
) -> SagaOrchestrator<InMemorySellerNetwork> {
    SagaOrchestrator::new(Arc::new(network.clone()), store, SagaConfig::default())
}

#[tokio::test]
async fn test_recovery_compensates_saga_killed_before_confirm() {
    let dir = tempfile::tempdir().unwrap();
    let seller1 = SellerId::new("seller1");
    let seller2 = SellerId::new("seller2");

    // Sellers hold two live reservations from the previous incarnation.
    let network = InMemorySellerNetwork::new();
    network.add_seller(seller1.clone(), [(ProductId::new("P1"), 10)]);
    network.add_seller(seller2.clone(), [(ProductId::new("P2"), 10)]);
    network.inject_reservation(
        &seller1,
        ReservationId::new("seller1-R1"),
        ProductId::new("P1"),
        3,
    );
    network.inject_reservation(
        &seller2,
        ReservationId::new("seller2-R1"),
        ProductId::new("P2"),
        4,
    );
    assert_eq!(network.available(&seller1, &ProductId::new("P1")), 7);
    assert_eq!(network.available(&seller2, &ProductId::new("P2")), 6);

    // The coordinator died after both reservations succeeded but before
    // CONFIRM: its last checkpoint is below.
    let saga_id = SagaId::new();
    {
        let store = FileStateStore::open(dir.path()).await.unwrap();
        let mut snapshot = SagaSnapshot::new(saga_id, OrderId::new("O6"), SagaState::Reserving);
        snapshot.compensations.push(CompensationRecord::cancel_reservation(
            seller1.clone(),
            ReservationId::new("seller1-R1"),
        ));
        snapshot.compensations.push(CompensationRecord::cancel_reservation(
            seller2.clone(),
            ReservationId::new("seller2-R1"),
        ));
        snapshot
            .reservations
            .insert(seller1.clone(), ReservationId::new("seller1-R1"));
        snapshot
            .reservations
            .insert(seller2.clone(), ReservationId::new("seller2-R1"));
        store.save(snapshot).await;
        store.flush_all().await;
    }

    // Restart: the new incarnation detects the non-terminal saga and
    // compensates it.
    let store = FileStateStore::open(dir.path()).await.unwrap();
    assert_eq!(store.active_count().await, 1);
    let orchestrator = orchestrator_over(&network, Arc::clone(&store)).await;

    let recovered = orchestrator.recover().await;

    assert_eq!(recovered, 1);
    assert_eq!(network.cancel_log(&seller1).len(), 1);
    assert_eq!(network.cancel_log(&seller2).len(), 1);
    assert_eq!(network.available(&seller1, &ProductId::new("P1")), 10);
    assert_eq!(network.available(&seller2, &ProductId::new("P2")), 10);
    assert_eq!(store.active_count().await, 0);
    assert!(!dir.path().join(format!("{saga_id}.json")).exists());
}

#[tokio::test]
async fn test_recovery_cancel_of_expired_reservation_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let seller1 = SellerId::new("seller1");

    // The seller already expired the reservation; cancel must succeed
    // idempotently and not disturb stock.
    let network = InMemorySellerNetwork::new();
    network.add_seller(seller1.clone(), [(ProductId::new("P1"), 10)]);

    {
        let store = FileStateStore::open(dir.path()).await.unwrap();
        let mut snapshot =
            SagaSnapshot::new(SagaId::new(), OrderId::new("O7"), SagaState::Reserving);
        snapshot.compensations.push(CompensationRecord::cancel_reservation(
            seller1.clone(),
            ReservationId::new("seller1-R1"),
        ));
        store.save(snapshot).await;
    }

    let store = FileStateStore::open(dir.path()).await.unwrap();
    let orchestrator = orchestrator_over(&network, Arc::clone(&store)).await;

    assert_eq!(orchestrator.recover().await, 1);
    assert_eq!(network.available(&seller1, &ProductId::new("P1")), 10);
    assert_eq!(store.active_count().await, 0);
}

#[tokio::test]
async fn test_recovery_with_no_observed_reservations_just_clears() {
    let dir = tempfile::tempdir().unwrap();
    let network = InMemorySellerNetwork::new();
    network.add_seller("seller1", [(ProductId::new("P1"), 10)]);

    {
        let store = FileStateStore::open(dir.path()).await.unwrap();
        store
            .save(SagaSnapshot::new(
                SagaId::new(),
                OrderId::new("O8"),
                SagaState::Started,
            ))
            .await;
    }

    let store = FileStateStore::open(dir.path()).await.unwrap();
    let orchestrator = orchestrator_over(&network, Arc::clone(&store)).await;

    assert_eq!(orchestrator.recover().await, 1);
    assert!(network.cancel_log(&SellerId::new("seller1")).is_empty());
    assert_eq!(store.active_count().await, 0);
}

#[tokio::test]
async fn test_recovery_ignores_stray_terminal_record() {
    let dir = tempfile::tempdir().unwrap();
    let network = InMemorySellerNetwork::new();

    {
        let store = FileStateStore::open(dir.path()).await.unwrap();
        store
            .save(SagaSnapshot::new(
                SagaId::new(),
                OrderId::new("O9"),
                SagaState::Completed,
            ))
            .await;
    }

    let store = FileStateStore::open(dir.path()).await.unwrap();
    let orchestrator = orchestrator_over(&network, Arc::clone(&store)).await;

    // Not counted as recovered, but the stray record is cleaned up.
    assert_eq!(orchestrator.recover().await, 0);
    assert_eq!(store.active_count().await, 0);
}
