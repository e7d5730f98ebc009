//! Broker-backed seller client.
//!
//! Every call goes out through the circuit breaker for the target peer
//! and the retry engine: the breaker is consulted once per logical call,
//! each retry attempt reuses the stable message ID with a fresh
//! correlation ID, and the breaker records one success or failure when
//! the retry chain resolves.

use std::sync::Arc;

use async_trait::async_trait;

use common::{CorrelationId, Envelope, OrderId, ProductId, ReservationId, SellerId};
use resilience::{BreakerRegistry, RetryPolicy};
use transport::MessageBroker;

use super::{SellerApi, SellerCallError};

/// Production [`SellerApi`] over the message broker.
pub struct SellerGateway {
    broker: Arc<MessageBroker>,
    breakers: BreakerRegistry,
    retry: RetryPolicy,
    marketplace_id: String,
}

impl SellerGateway {
    /// Creates a gateway sending requests as `marketplace_id`.
    pub fn new(
        broker: Arc<MessageBroker>,
        breakers: BreakerRegistry,
        retry: RetryPolicy,
        marketplace_id: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            breakers,
            retry,
            marketplace_id: marketplace_id.into(),
        }
    }

    /// Returns the breaker registry, for statistics.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    async fn call(
        &self,
        seller_id: &SellerId,
        operation: &'static str,
        request: Envelope,
    ) -> Result<Envelope, SellerCallError> {
        let breaker = self.breakers.breaker_for(seller_id);
        breaker.try_acquire()?;

        // The message ID in `request` stays stable across retries; only
        // the correlation ID is fresh per transmission.
        let result = self
            .retry
            .run(operation, || {
                let attempt = request.clone().with_correlation_id(CorrelationId::new());
                async move {
                    self.broker
                        .send_request(seller_id, attempt)
                        .await
                        .map_err(SellerCallError::from)
                }
            })
            .await;

        match result {
            Ok(response) => {
                // An explicit ERROR reply means the peer is healthy; only
                // delivery failures count against the breaker.
                breaker.record_success();
                if response.is_success() {
                    Ok(response)
                } else {
                    Err(SellerCallError::Rejected {
                        seller: seller_id.clone(),
                        operation,
                        reason: response
                            .error_reason()
                            .unwrap_or("unspecified error")
                            .to_string(),
                    })
                }
            }
            Err(error) => {
                breaker.record_failure();
                Err(error)
            }
        }
    }
}

#[async_trait]
impl SellerApi for SellerGateway {
    async fn reserve(
        &self,
        seller_id: &SellerId,
        order_id: &OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReservationId, SellerCallError> {
        let request = Envelope::reserve(
            self.marketplace_id.clone(),
            order_id.clone(),
            product_id.clone(),
            quantity,
        );
        let response = self.call(seller_id, "reserve", request).await?;
        response
            .data
            .reservation_id
            .ok_or_else(|| SellerCallError::BadResponse {
                seller: seller_id.clone(),
                operation: "reserve",
            })
    }

    async fn confirm(
        &self,
        seller_id: &SellerId,
        reservation_id: &ReservationId,
    ) -> Result<(), SellerCallError> {
        let request = Envelope::confirm(self.marketplace_id.clone(), reservation_id.clone());
        self.call(seller_id, "confirm", request).await.map(|_| ())
    }

    async fn cancel(
        &self,
        seller_id: &SellerId,
        reservation_id: &ReservationId,
    ) -> Result<(), SellerCallError> {
        let request = Envelope::cancel(self.marketplace_id.clone(), reservation_id.clone());
        self.call(seller_id, "cancel", request).await.map(|_| ())
    }
}
