//! Persisted saga state.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use common::{OrderId, ReservationId, SagaId, SagaState, SellerId};

/// The kind of a persisted compensation action.
///
/// Additional kinds can be added without touching the compensation loop;
/// the orchestrator matches on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationKind {
    /// Cancel a reservation previously made at a seller.
    CancelReservation,
}

/// A compensation action as it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationRecord {
    pub kind: CompensationKind,
    pub seller_id: SellerId,
    pub reservation_id: ReservationId,
    pub recorded_at: DateTime<Utc>,
}

impl CompensationRecord {
    /// Creates a cancel-reservation record stamped now.
    pub fn cancel_reservation(seller_id: SellerId, reservation_id: ReservationId) -> Self {
        Self {
            kind: CompensationKind::CancelReservation,
            seller_id,
            reservation_id,
            recorded_at: Utc::now(),
        }
    }
}

/// Snapshot of one saga, durable across coordinator restarts.
///
/// The compensation list is append-only and ordered by insertion; the
/// orchestrator undoes it in reverse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaSnapshot {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub state: SagaState,
    pub compensations: Vec<CompensationRecord>,
    pub reservations: HashMap<SellerId, ReservationId>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl SagaSnapshot {
    /// Creates a snapshot for a freshly started saga.
    pub fn new(saga_id: SagaId, order_id: OrderId, state: SagaState) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            order_id,
            state,
            compensations: Vec::new(),
            reservations: HashMap::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Returns true if the snapshot has not been updated within `timeout`.
    ///
    /// Lets an operator detect abandoned records.
    pub fn is_expired(&self, timeout: std::time::Duration) -> bool {
        let age = Utc::now() - self.last_updated;
        age > ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::MAX)
    }

    /// Returns true if the saga no longer needs recovery.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot() -> SagaSnapshot {
        SagaSnapshot::new(SagaId::new(), OrderId::new("O1"), SagaState::Started)
    }

    #[test]
    fn test_new_snapshot_is_empty_and_fresh() {
        let snapshot = snapshot();
        assert!(snapshot.compensations.is_empty());
        assert!(snapshot.reservations.is_empty());
        assert!(!snapshot.is_terminal());
        assert!(!snapshot.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_expired_after_timeout() {
        let mut snapshot = snapshot();
        snapshot.last_updated = Utc::now() - ChronoDuration::seconds(120);
        assert!(snapshot.is_expired(Duration::from_secs(60)));
        assert!(!snapshot.is_expired(Duration::from_secs(300)));
    }

    #[test]
    fn test_serde_round_trip_preserves_compensation_order() {
        let mut snapshot = snapshot();
        snapshot.state = SagaState::Reserving;
        snapshot.compensations.push(CompensationRecord::cancel_reservation(
            SellerId::new("seller1"),
            ReservationId::new("seller1-R1"),
        ));
        snapshot.compensations.push(CompensationRecord::cancel_reservation(
            SellerId::new("seller2"),
            ReservationId::new("seller2-R7"),
        ));
        snapshot
            .reservations
            .insert(SellerId::new("seller1"), ReservationId::new("seller1-R1"));

        let json = serde_json::to_string_pretty(&snapshot).unwrap();
        let back: SagaSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(back.saga_id, snapshot.saga_id);
        assert_eq!(back.state, SagaState::Reserving);
        assert_eq!(back.compensations, snapshot.compensations);
        assert_eq!(
            back.compensations[0].reservation_id,
            ReservationId::new("seller1-R1")
        );
        assert_eq!(back.reservations, snapshot.reservations);
    }

    #[test]
    fn test_compensation_kind_wire_name() {
        let json = serde_json::to_string(&CompensationKind::CancelReservation).unwrap();
        assert_eq!(json, "\"CANCEL_RESERVATION\"");
    }
}
