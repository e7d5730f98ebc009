//! Asynchronous identity-routed request/response transport.
//!
//! The coordinator binds a single front-end endpoint; each seller
//! connects and presents its stable identity. Messages are framed as
//! three length-prefixed parts — peer identity, an empty delimiter, and
//! the payload bytes — and responses are matched to requests by
//! correlation ID. There are no ordering guarantees between distinct
//! correlation IDs.

pub mod broker;
pub mod error;
pub mod framing;
pub mod peer;

pub use broker::MessageBroker;
pub use error::TransportError;
pub use framing::{RoutedCodec, RoutedFrame};
pub use peer::{run_peer, PeerConfig, RequestHandler};
