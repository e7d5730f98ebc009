//! Shared types for the marketplace coordinator and seller participants.
//!
//! This crate holds the vocabulary both executables agree on: typed
//! identifiers, the wire message envelope, the order model, and the saga
//! state machine.

pub mod message;
pub mod order;
pub mod saga_state;
pub mod shutdown;
pub mod types;

pub use message::{Envelope, MessageKind, Payload};
pub use shutdown::shutdown_signal;
pub use order::{Order, OrderItem, OrderStatus};
pub use saga_state::SagaState;
pub use types::{
    CorrelationId, CustomerId, MessageId, OrderId, ProductId, ReservationId, SagaId, SellerId,
};
