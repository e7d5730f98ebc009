//! Idempotent request handler: dispatches RESERVE / CONFIRM / CANCEL to
//! the inventory.
//!
//! The idempotency cache is consulted strictly before any side-effecting
//! operation runs. On a hit the cached response is replayed (only the
//! correlation ID is refreshed so the coordinator can route it); on a
//! miss the inventory operation executes and its response is recorded
//! under the request's message ID.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use common::{Envelope, MessageKind, Payload, SellerId};
use resilience::IdempotencyCache;
use transport::RequestHandler;

use crate::inventory::Inventory;

/// Seller-side request handler.
pub struct SellerHandler {
    seller_id: SellerId,
    inventory: Arc<Inventory>,
    cache: Arc<IdempotencyCache>,
}

impl SellerHandler {
    /// Creates a handler over the inventory and idempotency cache.
    pub fn new(
        seller_id: SellerId,
        inventory: Arc<Inventory>,
        cache: Arc<IdempotencyCache>,
    ) -> Self {
        Self {
            seller_id,
            inventory,
            cache,
        }
    }

    fn dispatch(&self, request: &Envelope) -> Envelope {
        match request.kind {
            MessageKind::Reserve => self.handle_reserve(request),
            MessageKind::Confirm => self.handle_confirm(request),
            MessageKind::Cancel => self.handle_cancel(request),
            MessageKind::Heartbeat | MessageKind::Success | MessageKind::Error => {
                Envelope::error_reply(request, self.seller_id.as_str(), "unsupported message type")
            }
        }
    }

    fn handle_reserve(&self, request: &Envelope) -> Envelope {
        let Some(product_id) = request.data.product_id.clone() else {
            return Envelope::error_reply(request, self.seller_id.as_str(), "missing productId");
        };
        let quantity = request.data.quantity.unwrap_or(0);

        match self.inventory.reserve(&product_id, quantity) {
            Ok(reservation_id) => {
                let data = Payload {
                    product_id: Some(product_id),
                    quantity: Some(quantity),
                    reservation_id: Some(reservation_id),
                    order_id: request.data.order_id.clone(),
                    ..Payload::default()
                };
                Envelope::success_reply(request, self.seller_id.as_str(), data)
            }
            Err(error) => {
                Envelope::error_reply(request, self.seller_id.as_str(), error.to_string())
            }
        }
    }

    fn handle_confirm(&self, request: &Envelope) -> Envelope {
        let Some(reservation_id) = request.data.reservation_id.clone() else {
            return Envelope::error_reply(
                request,
                self.seller_id.as_str(),
                "missing reservationId",
            );
        };

        match self.inventory.confirm(&reservation_id) {
            Ok(()) => {
                let data = Payload {
                    reservation_id: Some(reservation_id),
                    ..Payload::default()
                };
                Envelope::success_reply(request, self.seller_id.as_str(), data)
            }
            Err(error) => {
                Envelope::error_reply(request, self.seller_id.as_str(), error.to_string())
            }
        }
    }

    fn handle_cancel(&self, request: &Envelope) -> Envelope {
        let Some(reservation_id) = request.data.reservation_id.clone() else {
            return Envelope::error_reply(
                request,
                self.seller_id.as_str(),
                "missing reservationId",
            );
        };

        match self.inventory.cancel(&reservation_id) {
            Ok(_) => {
                let data = Payload {
                    reservation_id: Some(reservation_id),
                    ..Payload::default()
                };
                Envelope::success_reply(request, self.seller_id.as_str(), data)
            }
            Err(error) => {
                Envelope::error_reply(request, self.seller_id.as_str(), error.to_string())
            }
        }
    }
}

#[async_trait]
impl RequestHandler for SellerHandler {
    async fn handle(&self, request: Envelope) -> Option<Envelope> {
        metrics::counter!("seller_requests_total").increment(1);

        if let Some(cached) = self.cache.lookup(&request.message_id) {
            match serde_json::from_slice::<Envelope>(&cached) {
                Ok(mut replay) => {
                    metrics::counter!("seller_deduplicated_total").increment(1);
                    tracing::info!(
                        message_id = %request.message_id,
                        kind = %request.kind,
                        "replaying cached response"
                    );
                    replay.correlation_id = request.correlation_id;
                    return Some(replay);
                }
                Err(error) => {
                    tracing::warn!(%error, "cached response unreadable, reprocessing");
                }
            }
        }

        let response = self.dispatch(&request);
        match serde_json::to_vec(&response) {
            Ok(bytes) => self.cache.record(request.message_id, Bytes::from(bytes)),
            Err(error) => {
                tracing::warn!(%error, "failed to cache response");
            }
        }
        Some(response)
    }
}
