//! Saga error types.

use thiserror::Error;

use common::SagaState;

use crate::sellers::SellerCallError;

/// Errors that can occur while driving a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The state machine refused a transition. These are protocol bugs
    /// and fail the saga.
    #[error("invalid saga transition from {from} to {to}")]
    InvalidTransition { from: SagaState, to: SagaState },

    /// A phase could not complete because at least one call failed.
    #[error("{phase} phase failed")]
    PhaseFailed { phase: &'static str },

    /// A single call missed its per-request deadline.
    #[error("deadline elapsed for {operation}")]
    Deadline { operation: String },

    /// A seller call failed terminally.
    #[error(transparent)]
    Seller(#[from] SellerCallError),
}

impl SagaError {
    /// Returns true for errors that indicate a coordinator bug rather
    /// than a peer or environment failure.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, SagaError::InvalidTransition { .. })
    }
}
