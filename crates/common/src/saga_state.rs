//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Started ──► Reserving ──► ProductsReserved ──► Confirming ──► Completed
///    │            │               │                  │
///    │            ├───────────────┴──────────────────┴──► Compensating
///    │            │                                           │
///    └────────────┴──► Failed ◄───────────────────────────────┤
///                                                             ▼
///                                                 CompensationCompleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Saga created, no request sent yet.
    #[default]
    Started,

    /// Reserve requests are in flight.
    Reserving,

    /// Every line item holds a reservation.
    ProductsReserved,

    /// Confirm requests are in flight.
    Confirming,

    /// All confirmations succeeded (terminal state).
    Completed,

    /// Recorded compensations are being executed in reverse order.
    Compensating,

    /// Every recorded compensation was attempted (terminal state).
    CompensationCompleted,

    /// Saga aborted without compensation or compensation itself failed
    /// (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if `next` is a permitted transition from this state.
    ///
    /// This is the single transition table; callers move states with a
    /// compare-and-set and must not branch on state elsewhere.
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        use SagaState::*;
        match self {
            Started => matches!(next, Reserving | Failed),
            Reserving => matches!(next, ProductsReserved | Compensating | Failed),
            ProductsReserved => matches!(next, Confirming | Compensating),
            Confirming => matches!(next, Completed | Compensating),
            Compensating => matches!(next, CompensationCompleted | Failed),
            Completed | CompensationCompleted | Failed => false,
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::CompensationCompleted | SagaState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Started => "Started",
            SagaState::Reserving => "Reserving",
            SagaState::ProductsReserved => "ProductsReserved",
            SagaState::Confirming => "Confirming",
            SagaState::Completed => "Completed",
            SagaState::Compensating => "Compensating",
            SagaState::CompensationCompleted => "CompensationCompleted",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SagaState::*;

    const ALL: [SagaState; 8] = [
        Started,
        Reserving,
        ProductsReserved,
        Confirming,
        Completed,
        Compensating,
        CompensationCompleted,
        Failed,
    ];

    #[test]
    fn test_default_state_is_started() {
        assert_eq!(SagaState::default(), Started);
    }

    #[test]
    fn test_transition_table() {
        assert!(Started.can_transition_to(Reserving));
        assert!(Started.can_transition_to(Failed));
        assert!(!Started.can_transition_to(Confirming));

        assert!(Reserving.can_transition_to(ProductsReserved));
        assert!(Reserving.can_transition_to(Compensating));
        assert!(Reserving.can_transition_to(Failed));
        assert!(!Reserving.can_transition_to(Completed));

        assert!(ProductsReserved.can_transition_to(Confirming));
        assert!(ProductsReserved.can_transition_to(Compensating));
        assert!(!ProductsReserved.can_transition_to(Failed));

        assert!(Confirming.can_transition_to(Completed));
        assert!(Confirming.can_transition_to(Compensating));
        assert!(!Confirming.can_transition_to(Reserving));

        assert!(Compensating.can_transition_to(CompensationCompleted));
        assert!(Compensating.can_transition_to(Failed));
        assert!(!Compensating.can_transition_to(Completed));
    }

    #[test]
    fn test_terminal_states_absorb() {
        for terminal in [Completed, CompensationCompleted, Failed] {
            assert!(terminal.is_terminal());
            for next in ALL {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} must not transition to {next}"
                );
            }
        }
    }

    #[test]
    fn test_non_terminal_states() {
        for state in [Started, Reserving, ProductsReserved, Confirming, Compensating] {
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for state in ALL {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Started.to_string(), "Started");
        assert_eq!(ProductsReserved.to_string(), "ProductsReserved");
        assert_eq!(CompensationCompleted.to_string(), "CompensationCompleted");
    }

    #[test]
    fn test_serialization_round_trip() {
        for state in ALL {
            let json = serde_json::to_string(&state).unwrap();
            let back: SagaState = serde_json::from_str(&json).unwrap();
            assert_eq!(back, state);
        }
    }
}
