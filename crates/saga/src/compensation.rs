//! Compensating actions recorded during saga execution.

use chrono::{DateTime, Utc};

use common::{ReservationId, SellerId};
use state_store::{CompensationKind, CompensationRecord};

use crate::sellers::{SellerApi, SellerCallError};

/// The inverse of a previously successful saga step.
///
/// Actions accumulate in execution order and are undone in reverse. The
/// compensation loop matches on the variant, so new kinds slot in
/// without changing the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum CompensationAction {
    /// Cancel a reservation observed at a seller.
    CancelReservation {
        seller_id: SellerId,
        reservation_id: ReservationId,
        recorded_at: DateTime<Utc>,
    },
}

impl CompensationAction {
    /// Creates a cancel-reservation action stamped now.
    pub fn cancel_reservation(seller_id: SellerId, reservation_id: ReservationId) -> Self {
        Self::CancelReservation {
            seller_id,
            reservation_id,
            recorded_at: Utc::now(),
        }
    }

    /// Human-readable description for logs.
    pub fn description(&self) -> String {
        match self {
            Self::CancelReservation {
                seller_id,
                reservation_id,
                ..
            } => format!("cancel reservation {reservation_id} at {seller_id}"),
        }
    }

    /// Executes the action against the sellers.
    pub async fn execute<S: SellerApi + ?Sized>(&self, sellers: &S) -> Result<(), SellerCallError> {
        match self {
            Self::CancelReservation {
                seller_id,
                reservation_id,
                ..
            } => sellers.cancel(seller_id, reservation_id).await,
        }
    }

    /// Converts to the persisted form.
    pub fn to_record(&self) -> CompensationRecord {
        match self {
            Self::CancelReservation {
                seller_id,
                reservation_id,
                recorded_at,
            } => CompensationRecord {
                kind: CompensationKind::CancelReservation,
                seller_id: seller_id.clone(),
                reservation_id: reservation_id.clone(),
                recorded_at: *recorded_at,
            },
        }
    }

    /// Rebuilds the action from its persisted form.
    pub fn from_record(record: &CompensationRecord) -> Self {
        match record.kind {
            CompensationKind::CancelReservation => Self::CancelReservation {
                seller_id: record.seller_id.clone(),
                reservation_id: record.reservation_id.clone(),
                recorded_at: record.recorded_at,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let action = CompensationAction::cancel_reservation(
            SellerId::new("seller1"),
            ReservationId::new("seller1-R3"),
        );
        let record = action.to_record();
        assert_eq!(record.kind, CompensationKind::CancelReservation);
        assert_eq!(CompensationAction::from_record(&record), action);
    }

    #[test]
    fn test_description_names_the_target() {
        let action = CompensationAction::cancel_reservation(
            SellerId::new("seller2"),
            ReservationId::new("seller2-R9"),
        );
        assert_eq!(
            action.description(),
            "cancel reservation seller2-R9 at seller2"
        );
    }
}
