//! Customer order model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CustomerId, OrderId, ProductId, SellerId};

/// The status of an order as observed by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order accepted, not yet submitted to a saga.
    #[default]
    Created,

    /// Reserve requests are in flight.
    Reserving,

    /// Every line item has a reservation.
    AllReserved,

    /// Confirm requests are in flight.
    Confirming,

    /// All confirmations succeeded (terminal state).
    Completed,

    /// Compensation is unwinding observed reservations.
    Compensating,

    /// Saga compensated cleanly (terminal state).
    Cancelled,

    /// Timeout or unrecoverable error (terminal state).
    Failed,
}

impl OrderStatus {
    /// Returns true if no further status changes are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Created",
            OrderStatus::Reserving => "Reserving",
            OrderStatus::AllReserved => "AllReserved",
            OrderStatus::Confirming => "Confirming",
            OrderStatus::Completed => "Completed",
            OrderStatus::Compensating => "Compensating",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single line item: a quantity of one product from one seller.
///
/// Items are never reassigned between sellers by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub seller_id: SellerId,
    pub quantity: u32,
}

impl OrderItem {
    /// Creates a new line item.
    pub fn new(
        product_id: impl Into<ProductId>,
        seller_id: impl Into<SellerId>,
        quantity: u32,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            seller_id: seller_id.into(),
            quantity,
        }
    }
}

/// A multi-item customer order.
///
/// Identity, customer, items, and creation time are immutable after
/// construction; only the status changes as the saga progresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    order_id: OrderId,
    customer_id: CustomerId,
    marketplace_id: String,
    items: Vec<OrderItem>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    status: OrderStatus,
}

impl Order {
    /// Creates a new order in `Created` status.
    pub fn new(
        order_id: impl Into<OrderId>,
        customer_id: impl Into<CustomerId>,
        marketplace_id: impl Into<String>,
        items: Vec<OrderItem>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            marketplace_id: marketplace_id.into(),
            items,
            created_at: Utc::now(),
            status: OrderStatus::Created,
        }
    }

    /// Returns the order identifier.
    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// Returns the customer identifier.
    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    /// Returns the owning marketplace identifier.
    pub fn marketplace_id(&self) -> &str {
        &self.marketplace_id
    }

    /// Returns the line items.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns true if the order has at least one line item.
    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    /// Returns when the order was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Sets the order status.
    pub fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
    }
}
