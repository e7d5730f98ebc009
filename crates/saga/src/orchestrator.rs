//! Saga orchestrator driving the two-phase reserve/confirm protocol.

use std::sync::Arc;
use std::time::Duration;

use common::{Order, OrderItem, OrderStatus, ReservationId, SagaState, SellerId};
use state_store::FileStateStore;

use crate::compensation::CompensationAction;
use crate::error::SagaError;
use crate::instance::SagaInstance;
use crate::sellers::SellerApi;

/// Orchestrator timeouts.
///
/// These must satisfy per-request < per-phase < per-saga so a saga
/// timeout never fires before a request could have timed out.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Bound on the whole saga; on expiry compensation is forced and the
    /// order fails.
    pub saga_timeout: Duration,

    /// Deadline applied to each reserve/confirm call inside a phase.
    pub phase_timeout: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            saga_timeout: Duration::from_secs(60),
            phase_timeout: Duration::from_secs(10),
        }
    }
}

/// Drives order sagas: reserve all items, confirm all reservations, and
/// unwind with compensating cancels on any failure.
pub struct SagaOrchestrator<S: SellerApi> {
    sellers: Arc<S>,
    store: Arc<FileStateStore>,
    config: SagaConfig,
}

impl<S: SellerApi + 'static> SagaOrchestrator<S> {
    /// Creates an orchestrator over the given seller API and state store.
    pub fn new(sellers: Arc<S>, store: Arc<FileStateStore>, config: SagaConfig) -> Self {
        Self {
            sellers,
            store,
            config,
        }
    }

    /// Returns the state store backing this orchestrator.
    pub fn store(&self) -> &Arc<FileStateStore> {
        &self.store
    }

    /// Runs one order through the saga, returning it with its final
    /// status: `Completed`, `Cancelled`, or `Failed`.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id()))]
    pub async fn process_order(&self, order: Order) -> Order {
        metrics::counter!("saga_executions_total").increment(1);
        let started = std::time::Instant::now();

        let mut saga = SagaInstance::new(order);
        let saga_id = saga.saga_id();
        tracing::info!(%saga_id, "saga started");
        self.store.save(saga.snapshot()).await;

        match tokio::time::timeout(self.config.saga_timeout, self.execute(&mut saga)).await {
            Ok(Ok(())) => {
                metrics::counter!("saga_completed").increment(1);
                tracing::info!(%saga_id, "saga completed");
            }
            Ok(Err(error)) => {
                tracing::warn!(%saga_id, %error, "saga failed, compensating");
                let protocol_error = error.is_protocol_error();
                self.compensate(&mut saga).await;
                if protocol_error {
                    saga.order_mut().set_status(OrderStatus::Failed);
                }
                metrics::counter!("saga_failed").increment(1);
            }
            Err(_) => {
                // Dropping the execute future cancels outstanding
                // requests and pending retries.
                tracing::error!(
                    %saga_id,
                    timeout_s = self.config.saga_timeout.as_secs(),
                    "saga timed out, forcing compensation"
                );
                self.compensate(&mut saga).await;
                saga.order_mut().set_status(OrderStatus::Failed);
                metrics::counter!("saga_failed").increment(1);
            }
        }

        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
        saga.into_order()
    }

    /// Drives recovered non-terminal sagas to a terminal state.
    ///
    /// Every recorded compensation is executed in reverse order, then the
    /// record is cleared. Compensation is always safe here: the list only
    /// contains observed successes, and seller-side cancel is idempotent.
    /// Returns the number of sagas compensated.
    pub async fn recover(&self) -> usize {
        let snapshots = self.store.active().await;
        let mut recovered = 0;

        for snapshot in snapshots {
            if snapshot.is_terminal() {
                self.store.remove(snapshot.saga_id).await;
                continue;
            }
            tracing::info!(
                saga_id = %snapshot.saga_id,
                order_id = %snapshot.order_id,
                state = %snapshot.state,
                compensations = snapshot.compensations.len(),
                "compensating recovered saga"
            );
            for record in snapshot.compensations.iter().rev() {
                let action = CompensationAction::from_record(record);
                if let Err(error) = action.execute(self.sellers.as_ref()).await {
                    tracing::warn!(
                        saga_id = %snapshot.saga_id,
                        action = %action.description(),
                        %error,
                        "recovery compensation failed"
                    );
                }
            }
            self.store.remove(snapshot.saga_id).await;
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!(recovered, "recovered sagas driven to terminal state");
        }
        recovered
    }

    async fn execute(&self, saga: &mut SagaInstance) -> Result<(), SagaError> {
        saga.transition_to(SagaState::Reserving)?;
        saga.order_mut().set_status(OrderStatus::Reserving);
        self.store.save(saga.snapshot()).await;

        // Reserve phase: one request per line item, concurrently.
        let order_id = saga.order().order_id().clone();
        let items: Vec<OrderItem> = saga.order().items().to_vec();
        let reserve_results =
            futures_util::future::join_all(items.iter().map(|item| {
                let sellers = Arc::clone(&self.sellers);
                let order_id = order_id.clone();
                let deadline = self.config.phase_timeout;
                async move {
                    match tokio::time::timeout(
                        deadline,
                        sellers.reserve(
                            &item.seller_id,
                            &order_id,
                            &item.product_id,
                            item.quantity,
                        ),
                    )
                    .await
                    {
                        Ok(result) => result.map_err(SagaError::from),
                        Err(_) => Err(SagaError::Deadline {
                            operation: format!(
                                "reserve {} at {}",
                                item.product_id, item.seller_id
                            ),
                        }),
                    }
                }
            }))
            .await;

        let mut all_reserved = true;
        for (item, result) in items.iter().zip(reserve_results) {
            match result {
                Ok(reservation_id) => {
                    tracing::info!(
                        saga_id = %saga.saga_id(),
                        seller_id = %item.seller_id,
                        product_id = %item.product_id,
                        %reservation_id,
                        "reservation observed"
                    );
                    saga.record_reservation(item.seller_id.clone(), reservation_id);
                }
                Err(error) => {
                    tracing::warn!(
                        saga_id = %saga.saga_id(),
                        seller_id = %item.seller_id,
                        product_id = %item.product_id,
                        %error,
                        "reservation failed"
                    );
                    all_reserved = false;
                }
            }
        }
        // Observed reservations are durable before confirmation starts.
        self.store.save(saga.snapshot()).await;

        if !all_reserved {
            return Err(SagaError::PhaseFailed { phase: "reserve" });
        }

        saga.transition_to(SagaState::ProductsReserved)?;
        saga.order_mut().set_status(OrderStatus::AllReserved);
        self.store.save(saga.snapshot()).await;

        saga.transition_to(SagaState::Confirming)?;
        saga.order_mut().set_status(OrderStatus::Confirming);
        self.store.save(saga.snapshot()).await;

        // Confirm phase: every recorded reservation, concurrently. A
        // single failure triggers full compensation.
        let reservations: Vec<(SellerId, ReservationId)> = saga
            .reservations()
            .iter()
            .map(|(seller_id, reservation_id)| (seller_id.clone(), reservation_id.clone()))
            .collect();
        let confirm_results = futures_util::future::join_all(reservations.iter().map(
            |(seller_id, reservation_id)| {
                let sellers = Arc::clone(&self.sellers);
                let deadline = self.config.phase_timeout;
                async move {
                    match tokio::time::timeout(
                        deadline,
                        sellers.confirm(seller_id, reservation_id),
                    )
                    .await
                    {
                        Ok(result) => result.map_err(SagaError::from),
                        Err(_) => Err(SagaError::Deadline {
                            operation: format!("confirm {reservation_id} at {seller_id}"),
                        }),
                    }
                }
            },
        ))
        .await;

        let mut all_confirmed = true;
        for ((seller_id, reservation_id), result) in reservations.iter().zip(confirm_results) {
            if let Err(error) = result {
                tracing::warn!(
                    saga_id = %saga.saga_id(),
                    %seller_id,
                    %reservation_id,
                    %error,
                    "confirmation failed"
                );
                all_confirmed = false;
            }
        }
        if !all_confirmed {
            return Err(SagaError::PhaseFailed { phase: "confirm" });
        }

        saga.transition_to(SagaState::Completed)?;
        saga.order_mut().set_status(OrderStatus::Completed);
        self.store.save(saga.snapshot()).await;
        // Terminal sagas keep no durable record.
        self.store.remove(saga.saga_id()).await;
        Ok(())
    }

    async fn compensate(&self, saga: &mut SagaInstance) {
        let saga_id = saga.saga_id();

        if !saga.state().can_transition_to(SagaState::Compensating) {
            // Nothing was observed yet (or the saga already terminated):
            // fail it and clear the record.
            if !saga.state().is_terminal() && saga.transition_to(SagaState::Failed).is_ok() {
                saga.order_mut().set_status(OrderStatus::Failed);
                self.store.save(saga.snapshot()).await;
            }
            self.store.remove(saga_id).await;
            return;
        }

        if saga.transition_to(SagaState::Compensating).is_err() {
            return;
        }
        saga.order_mut().set_status(OrderStatus::Compensating);
        self.store.save(saga.snapshot()).await;
        metrics::counter!("saga_compensations_total").increment(1);

        // Reverse insertion order; failures are logged but never abort
        // the sweep.
        for action in saga.compensations().iter().rev() {
            match action.execute(self.sellers.as_ref()).await {
                Ok(()) => {
                    tracing::info!(
                        %saga_id,
                        action = %action.description(),
                        "compensation executed"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        %saga_id,
                        action = %action.description(),
                        %error,
                        "compensation failed"
                    );
                }
            }
        }

        if let Err(error) = saga.transition_to(SagaState::CompensationCompleted) {
            tracing::error!(%saga_id, %error, "could not complete compensation");
            return;
        }
        saga.order_mut().set_status(OrderStatus::Cancelled);
        self.store.save(saga.snapshot()).await;
        self.store.remove(saga_id).await;
    }
}
