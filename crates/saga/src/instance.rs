//! In-flight saga instance.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use common::{Order, ReservationId, SagaId, SagaState, SellerId};
use state_store::SagaSnapshot;

use crate::compensation::CompensationAction;
use crate::error::SagaError;

/// One saga execution, owned by its driver task.
///
/// The driver is the single writer; other tasks only ever see snapshots
/// taken through [`SagaInstance::snapshot`].
#[derive(Debug)]
pub struct SagaInstance {
    saga_id: SagaId,
    order: Order,
    state: SagaState,
    compensations: Vec<CompensationAction>,
    reservations: HashMap<SellerId, ReservationId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SagaInstance {
    /// Creates a saga for the order with a fresh saga ID.
    ///
    /// The saga ID is distinct from the order ID so a retried order gets
    /// fresh saga semantics.
    pub fn new(order: Order) -> Self {
        let now = Utc::now();
        Self {
            saga_id: SagaId::new(),
            order,
            state: SagaState::Started,
            compensations: Vec::new(),
            reservations: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the saga identifier.
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    /// Returns the current state.
    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Returns the order being fulfilled.
    pub fn order(&self) -> &Order {
        &self.order
    }

    /// Returns the order for status updates.
    pub fn order_mut(&mut self) -> &mut Order {
        &mut self.order
    }

    /// Consumes the saga, yielding the order with its final status.
    pub fn into_order(self) -> Order {
        self.order
    }

    /// Moves the state machine with compare-and-set discipline.
    ///
    /// The transition is rejected unless the table permits it from the
    /// current state; the caller decides what a rejection means.
    pub fn transition_to(&mut self, next: SagaState) -> Result<(), SagaError> {
        if !self.state.can_transition_to(next) {
            return Err(SagaError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(
            saga_id = %self.saga_id,
            from = %self.state,
            to = %next,
            "saga transition"
        );
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Records an observed reservation: the compensation entry and the
    /// seller→reservation mapping are appended before the reservation
    /// counts as observed.
    pub fn record_reservation(&mut self, seller_id: SellerId, reservation_id: ReservationId) {
        self.compensations.push(CompensationAction::cancel_reservation(
            seller_id.clone(),
            reservation_id.clone(),
        ));
        self.reservations.insert(seller_id, reservation_id);
        self.updated_at = Utc::now();
    }

    /// Returns the recorded compensation actions in insertion order.
    pub fn compensations(&self) -> &[CompensationAction] {
        &self.compensations
    }

    /// Returns the seller→reservation mapping.
    pub fn reservations(&self) -> &HashMap<SellerId, ReservationId> {
        &self.reservations
    }

    /// Takes a persistable snapshot of the current state.
    pub fn snapshot(&self) -> SagaSnapshot {
        SagaSnapshot {
            saga_id: self.saga_id,
            order_id: self.order.order_id().clone(),
            state: self.state,
            compensations: self
                .compensations
                .iter()
                .map(CompensationAction::to_record)
                .collect(),
            reservations: self.reservations.clone(),
            created_at: self.created_at,
            last_updated: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderItem;

    fn sample_saga() -> SagaInstance {
        SagaInstance::new(Order::new(
            "O1",
            "customer1",
            "marketplace1",
            vec![OrderItem::new("P1", "seller1", 5)],
        ))
    }

    #[test]
    fn test_new_saga_starts_clean() {
        let saga = sample_saga();
        assert_eq!(saga.state(), SagaState::Started);
        assert!(saga.compensations().is_empty());
        assert!(saga.reservations().is_empty());
    }

    #[test]
    fn test_valid_transition_chain() {
        let mut saga = sample_saga();
        saga.transition_to(SagaState::Reserving).unwrap();
        saga.transition_to(SagaState::ProductsReserved).unwrap();
        saga.transition_to(SagaState::Confirming).unwrap();
        saga.transition_to(SagaState::Completed).unwrap();
        assert!(saga.state().is_terminal());
    }

    #[test]
    fn test_invalid_transition_is_rejected_and_state_kept() {
        let mut saga = sample_saga();
        let error = saga.transition_to(SagaState::Confirming).unwrap_err();
        assert!(matches!(
            error,
            SagaError::InvalidTransition {
                from: SagaState::Started,
                to: SagaState::Confirming,
            }
        ));
        assert_eq!(saga.state(), SagaState::Started);
    }

    #[test]
    fn test_record_reservation_appends_compensation() {
        let mut saga = sample_saga();
        saga.record_reservation(SellerId::new("seller1"), ReservationId::new("seller1-R1"));
        saga.record_reservation(SellerId::new("seller2"), ReservationId::new("seller2-R5"));

        assert_eq!(saga.compensations().len(), 2);
        assert_eq!(
            saga.reservations().get(&SellerId::new("seller1")),
            Some(&ReservationId::new("seller1-R1"))
        );
        // Insertion order is preserved for the reverse unwind.
        assert_eq!(
            saga.compensations()[0].description(),
            "cancel reservation seller1-R1 at seller1"
        );
        assert_eq!(
            saga.compensations()[1].description(),
            "cancel reservation seller2-R5 at seller2"
        );
    }

    #[test]
    fn test_snapshot_reflects_instance() {
        let mut saga = sample_saga();
        saga.transition_to(SagaState::Reserving).unwrap();
        saga.record_reservation(SellerId::new("seller1"), ReservationId::new("seller1-R1"));

        let snapshot = saga.snapshot();
        assert_eq!(snapshot.saga_id, saga.saga_id());
        assert_eq!(snapshot.order_id, common::OrderId::new("O1"));
        assert_eq!(snapshot.state, SagaState::Reserving);
        assert_eq!(snapshot.compensations.len(), 1);
        assert_eq!(snapshot.reservations.len(), 1);
    }
}
