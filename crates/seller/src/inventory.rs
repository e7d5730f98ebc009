//! Inventory with reservation semantics and timeout-based expiry.
//!
//! Local invariant: for every product,
//! `available + Σ unconfirmed reservation qty + Σ confirmed qty ==
//! initial stock`. Reservations hold their quantity out of available
//! stock until confirmed (permanent) or cancelled/expired (restored
//! exactly once).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use common::{ProductId, ReservationId, SellerId};

/// Why a reserve request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReserveError {
    #[error("invalid quantity")]
    InvalidQuantity,

    #[error("unknown product {0}")]
    UnknownProduct(ProductId),

    #[error("insufficient stock for {product}: {available} < {requested}")]
    OutOfStock {
        product: ProductId,
        available: u32,
        requested: u32,
    },
}

/// Why a confirm request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfirmError {
    #[error("reservation not found")]
    NotFound,

    #[error("reservation expired")]
    Expired,

    #[error("reservation already confirmed")]
    AlreadyConfirmed,
}

/// Why a cancel request was refused.
///
/// Cancelling an absent reservation is not an error: it succeeds
/// idempotently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CancelError {
    #[error("reservation already confirmed")]
    AlreadyConfirmed,
}

/// Outcome of a successful cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The reservation existed and its stock was restored.
    Cancelled,

    /// No such reservation (already cancelled or expired); nothing to do.
    NoOp,
}

#[derive(Debug, Clone)]
struct Reservation {
    product_id: ProductId,
    quantity: u32,
    confirmed: bool,
    expires_at: Instant,
}

impl Reservation {
    fn is_expired(&self) -> bool {
        !self.confirmed && Instant::now() > self.expires_at
    }
}

#[derive(Debug, Default)]
struct InventoryState {
    stock: HashMap<ProductId, u32>,
    reservations: HashMap<ReservationId, Reservation>,
    next_reservation: u64,
}

/// Per-seller inventory.
///
/// Writers take the lock exclusively for reserve/confirm/cancel and the
/// expiry sweep; status queries share it.
#[derive(Debug)]
pub struct Inventory {
    seller_id: SellerId,
    reservation_timeout: Duration,
    state: RwLock<InventoryState>,
}

impl Inventory {
    /// Creates an empty inventory for a seller.
    pub fn new(seller_id: SellerId, reservation_timeout: Duration) -> Self {
        Self {
            seller_id,
            reservation_timeout,
            state: RwLock::new(InventoryState::default()),
        }
    }

    /// Sets the available stock for a product.
    pub fn seed(&self, product_id: impl Into<ProductId>, quantity: u32) {
        self.state
            .write()
            .unwrap()
            .stock
            .insert(product_id.into(), quantity);
    }

    /// Reserves `quantity` of a product.
    ///
    /// On success the quantity is held out of available stock and a
    /// reservation with an expiry timestamp is recorded.
    pub fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReservationId, ReserveError> {
        if quantity == 0 {
            return Err(ReserveError::InvalidQuantity);
        }

        let mut state = self.state.write().unwrap();
        // Reclaim expired holds before judging availability.
        sweep_locked(&mut state);

        let available = state
            .stock
            .get_mut(product_id)
            .ok_or_else(|| ReserveError::UnknownProduct(product_id.clone()))?;
        if *available < quantity {
            return Err(ReserveError::OutOfStock {
                product: product_id.clone(),
                available: *available,
                requested: quantity,
            });
        }

        *available -= quantity;
        state.next_reservation += 1;
        let reservation_id =
            ReservationId::new(format!("{}-R{}", self.seller_id, state.next_reservation));
        state.reservations.insert(
            reservation_id.clone(),
            Reservation {
                product_id: product_id.clone(),
                quantity,
                confirmed: false,
                expires_at: Instant::now() + self.reservation_timeout,
            },
        );

        tracing::info!(
            seller_id = %self.seller_id,
            %product_id,
            quantity,
            %reservation_id,
            remaining = state.stock[product_id],
            "reserved"
        );
        Ok(reservation_id)
    }

    /// Confirms a reservation, making it permanent.
    ///
    /// A confirmed reservation is terminal: it can never be cancelled
    /// and its stock is never restored.
    pub fn confirm(&self, reservation_id: &ReservationId) -> Result<(), ConfirmError> {
        let mut state = self.state.write().unwrap();
        let reservation = state
            .reservations
            .get_mut(reservation_id)
            .ok_or(ConfirmError::NotFound)?;

        if reservation.confirmed {
            return Err(ConfirmError::AlreadyConfirmed);
        }
        if reservation.is_expired() {
            return Err(ConfirmError::Expired);
        }

        reservation.confirmed = true;
        tracing::info!(seller_id = %self.seller_id, %reservation_id, "confirmed");
        Ok(())
    }

    /// Cancels a reservation, restoring its quantity.
    ///
    /// Cancelling an absent (or already expired and swept) reservation
    /// succeeds as a no-op so retried cancels are harmless.
    pub fn cancel(&self, reservation_id: &ReservationId) -> Result<CancelOutcome, CancelError> {
        let mut state = self.state.write().unwrap();

        match state.reservations.get(reservation_id) {
            None => Ok(CancelOutcome::NoOp),
            Some(reservation) if reservation.confirmed => Err(CancelError::AlreadyConfirmed),
            Some(_) => {
                let reservation = state.reservations.remove(reservation_id).unwrap();
                *state.stock.entry(reservation.product_id.clone()).or_insert(0) +=
                    reservation.quantity;
                tracing::info!(
                    seller_id = %self.seller_id,
                    %reservation_id,
                    restored = reservation.quantity,
                    product_id = %reservation.product_id,
                    "cancelled"
                );
                Ok(CancelOutcome::Cancelled)
            }
        }
    }

    /// Removes expired unconfirmed reservations and restores their
    /// stock. Returns the number of reservations reclaimed.
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.state.write().unwrap();
        let reclaimed = sweep_locked(&mut state);
        if reclaimed > 0 {
            tracing::info!(seller_id = %self.seller_id, reclaimed, "expired reservations reclaimed");
        }
        reclaimed
    }

    /// Returns the available stock for a product.
    pub fn available(&self, product_id: &ProductId) -> Option<u32> {
        self.state.read().unwrap().stock.get(product_id).copied()
    }

    /// Returns `(open, confirmed)` reservation counts.
    pub fn reservation_counts(&self) -> (usize, usize) {
        let state = self.state.read().unwrap();
        let confirmed = state
            .reservations
            .values()
            .filter(|reservation| reservation.confirmed)
            .count();
        (state.reservations.len() - confirmed, confirmed)
    }

    /// Returns every product with its available quantity.
    pub fn status(&self) -> Vec<(ProductId, u32)> {
        let state = self.state.read().unwrap();
        let mut status: Vec<_> = state
            .stock
            .iter()
            .map(|(product_id, quantity)| (product_id.clone(), *quantity))
            .collect();
        status.sort_by(|a, b| a.0.cmp(&b.0));
        status
    }

    /// Checks the conservation invariant for one product against its
    /// initial stock.
    pub fn invariant_holds(&self, product_id: &ProductId, initial_stock: u32) -> bool {
        let state = self.state.read().unwrap();
        let available = state.stock.get(product_id).copied().unwrap_or(0);
        let held: u32 = state
            .reservations
            .values()
            .filter(|reservation| reservation.product_id == *product_id)
            .map(|reservation| reservation.quantity)
            .sum();
        available + held == initial_stock
    }

    /// Spawns the periodic expiry sweep, stopping on shutdown.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let inventory = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.reset();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inventory.sweep_expired();
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

fn sweep_locked(state: &mut InventoryState) -> usize {
    let expired: Vec<ReservationId> = state
        .reservations
        .iter()
        .filter(|(_, reservation)| reservation.is_expired())
        .map(|(reservation_id, _)| reservation_id.clone())
        .collect();

    for reservation_id in &expired {
        if let Some(reservation) = state.reservations.remove(reservation_id) {
            *state.stock.entry(reservation.product_id).or_insert(0) += reservation.quantity;
        }
    }
    expired.len()
}
