//! Seller-facing call surface used by the orchestrator.
//!
//! The orchestrator talks to sellers through the [`SellerApi`] trait:
//! [`SellerGateway`] is the production implementation (transport wrapped
//! by circuit breakers and retries), [`InMemorySellerNetwork`] the
//! deterministic fake used in tests.

pub mod gateway;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use common::{OrderId, ProductId, ReservationId, SellerId};
use resilience::{BreakerOpen, Retryable};
use transport::TransportError;

pub use gateway::SellerGateway;
pub use memory::InMemorySellerNetwork;

/// A failed call to a seller.
#[derive(Debug, Error)]
pub enum SellerCallError {
    /// The seller answered with an explicit ERROR (out of stock, unknown
    /// reservation, expired reservation). Never retried.
    #[error("seller {seller} rejected {operation}: {reason}")]
    Rejected {
        seller: SellerId,
        operation: &'static str,
        reason: String,
    },

    /// The per-peer circuit breaker refused the call.
    #[error(transparent)]
    Breaker(#[from] BreakerOpen),

    /// The transport could not deliver the request or its response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The seller answered SUCCESS but the payload was missing required
    /// fields.
    #[error("seller {seller} returned an incomplete {operation} response")]
    BadResponse {
        seller: SellerId,
        operation: &'static str,
    },
}

impl Retryable for SellerCallError {
    fn is_retryable(&self) -> bool {
        match self {
            SellerCallError::Transport(error) => error.is_retryable(),
            SellerCallError::Rejected { .. }
            | SellerCallError::Breaker(_)
            | SellerCallError::BadResponse { .. } => false,
        }
    }
}

/// Operations the coordinator performs against sellers.
#[async_trait]
pub trait SellerApi: Send + Sync {
    /// Reserves `quantity` of `product_id` at the seller, returning the
    /// reservation ID on success.
    async fn reserve(
        &self,
        seller_id: &SellerId,
        order_id: &OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReservationId, SellerCallError>;

    /// Confirms a reservation, making it permanent.
    async fn confirm(
        &self,
        seller_id: &SellerId,
        reservation_id: &ReservationId,
    ) -> Result<(), SellerCallError>;

    /// Cancels a reservation, restoring its stock.
    async fn cancel(
        &self,
        seller_id: &SellerId,
        reservation_id: &ReservationId,
    ) -> Result<(), SellerCallError>;
}
