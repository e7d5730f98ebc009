//! Durable saga state persistence.
//!
//! One record per active saga, each in its own file, so the coordinator
//! can compensate in-flight sagas after a restart. Records are written
//! through on every transition, flushed periodically in the background,
//! and removed once the saga reaches a terminal state.

pub mod error;
pub mod file;
pub mod snapshot;

pub use error::{Result, StateStoreError};
pub use file::FileStateStore;
pub use snapshot::{CompensationKind, CompensationRecord, SagaSnapshot};
