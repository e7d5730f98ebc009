//! Wire message envelope exchanged between the coordinator and sellers.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{CorrelationId, MessageId, OrderId, ProductId, ReservationId};

/// The kind of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Request to reserve stock for a product.
    Reserve,

    /// Request to confirm a previously made reservation.
    Confirm,

    /// Request to cancel a reservation and restore its stock.
    Cancel,

    /// Liveness signal from a peer; never occupies the pending table.
    Heartbeat,

    /// Successful response to a request.
    Success,

    /// Failed response to a request, with a reason in the payload.
    Error,
}

impl MessageKind {
    /// Returns the kind name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Reserve => "RESERVE",
            MessageKind::Confirm => "CONFIRM",
            MessageKind::Cancel => "CANCEL",
            MessageKind::Heartbeat => "HEARTBEAT",
            MessageKind::Success => "SUCCESS",
            MessageKind::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type-dependent data carried by an envelope.
///
/// Fields are optional so the same shape serves every message kind;
/// absent fields are omitted from the wire form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Payload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<ReservationId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Payload {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self.product_id.is_none()
            && self.quantity.is_none()
            && self.reservation_id.is_none()
            && self.order_id.is_none()
            && self.reason.is_none()
    }
}

/// A wire message.
///
/// Every envelope carries a stable `message_id` (the idempotency key,
/// unchanged across retries of the same logical request) and, for
/// request/response traffic, a `correlation_id` that is fresh per
/// transmission and routes the response back to its awaiting caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_id: MessageId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,

    #[serde(rename = "type")]
    pub kind: MessageKind,

    pub sender_id: String,

    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub data: Payload,
}

impl Envelope {
    /// Creates an envelope with a fresh message ID and the current time.
    pub fn new(kind: MessageKind, sender_id: impl Into<String>) -> Self {
        Self {
            message_id: MessageId::new(),
            correlation_id: None,
            kind,
            sender_id: sender_id.into(),
            timestamp: Utc::now().timestamp_millis(),
            data: Payload::default(),
        }
    }

    /// Builds a RESERVE request for a line item.
    pub fn reserve(
        sender_id: impl Into<String>,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Self {
        let mut envelope = Self::new(MessageKind::Reserve, sender_id);
        envelope.data.order_id = Some(order_id);
        envelope.data.product_id = Some(product_id);
        envelope.data.quantity = Some(quantity);
        envelope
    }

    /// Builds a CONFIRM request for a reservation.
    pub fn confirm(sender_id: impl Into<String>, reservation_id: ReservationId) -> Self {
        let mut envelope = Self::new(MessageKind::Confirm, sender_id);
        envelope.data.reservation_id = Some(reservation_id);
        envelope
    }

    /// Builds a CANCEL request for a reservation.
    pub fn cancel(sender_id: impl Into<String>, reservation_id: ReservationId) -> Self {
        let mut envelope = Self::new(MessageKind::Cancel, sender_id);
        envelope.data.reservation_id = Some(reservation_id);
        envelope
    }

    /// Builds a HEARTBEAT message.
    pub fn heartbeat(sender_id: impl Into<String>) -> Self {
        Self::new(MessageKind::Heartbeat, sender_id)
    }

    /// Builds a SUCCESS response to a request, echoing its correlation ID.
    pub fn success_reply(request: &Envelope, sender_id: impl Into<String>, data: Payload) -> Self {
        let mut envelope = Self::new(MessageKind::Success, sender_id);
        envelope.correlation_id = request.correlation_id;
        envelope.data = data;
        envelope
    }

    /// Builds an ERROR response to a request, echoing its correlation ID.
    pub fn error_reply(
        request: &Envelope,
        sender_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let mut envelope = Self::new(MessageKind::Error, sender_id);
        envelope.correlation_id = request.correlation_id;
        envelope.data.reason = Some(reason.into());
        envelope
    }

    /// Sets the message ID, preserving it across retries.
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = message_id;
        self
    }

    /// Sets the correlation ID for this transmission.
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Returns true for SUCCESS responses.
    pub fn is_success(&self) -> bool {
        self.kind == MessageKind::Success
    }

    /// Returns the error reason, if this is an ERROR response carrying one.
    pub fn error_reason(&self) -> Option<&str> {
        if self.kind == MessageKind::Error {
            self.data.reason.as_deref()
        } else {
            None
        }
    }
}
