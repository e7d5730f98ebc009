//! In-memory seller network for testing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use common::{OrderId, ProductId, ReservationId, SellerId};

use super::{SellerApi, SellerCallError};

#[derive(Debug, Clone)]
struct FakeReservation {
    product_id: ProductId,
    quantity: u32,
    confirmed: bool,
}

#[derive(Debug, Default)]
struct FakeSeller {
    stock: HashMap<ProductId, u32>,
    reservations: HashMap<ReservationId, FakeReservation>,
    next_id: u32,
    /// Number of upcoming reserve calls to reject with out-of-stock.
    reject_reserves: u32,
    /// Reject every confirm as if the reservation had expired.
    fail_confirms: bool,
    cancel_log: Vec<ReservationId>,
}

/// Deterministic [`SellerApi`] over in-memory sellers.
///
/// Supports failure injection so tests can drive every saga path.
#[derive(Debug, Clone, Default)]
pub struct InMemorySellerNetwork {
    sellers: Arc<RwLock<HashMap<SellerId, FakeSeller>>>,
}

impl InMemorySellerNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a seller with initial stock.
    pub fn add_seller(
        &self,
        seller_id: impl Into<SellerId>,
        stock: impl IntoIterator<Item = (ProductId, u32)>,
    ) {
        let mut sellers = self.sellers.write().unwrap();
        let seller = sellers.entry(seller_id.into()).or_default();
        seller.stock.extend(stock);
    }

    /// Rejects the next `count` reserve calls at the seller.
    pub fn set_reject_reserves(&self, seller_id: &SellerId, count: u32) {
        if let Some(seller) = self.sellers.write().unwrap().get_mut(seller_id) {
            seller.reject_reserves = count;
        }
    }

    /// Makes every confirm at the seller fail as expired.
    pub fn set_fail_confirms(&self, seller_id: &SellerId, fail: bool) {
        if let Some(seller) = self.sellers.write().unwrap().get_mut(seller_id) {
            seller.fail_confirms = fail;
        }
    }

    /// Pre-loads a reservation, as if it survived a coordinator crash.
    pub fn inject_reservation(
        &self,
        seller_id: &SellerId,
        reservation_id: ReservationId,
        product_id: ProductId,
        quantity: u32,
    ) {
        let mut sellers = self.sellers.write().unwrap();
        let seller = sellers.entry(seller_id.clone()).or_default();
        let available = seller.stock.entry(product_id.clone()).or_insert(0);
        *available = available.saturating_sub(quantity);
        seller.reservations.insert(
            reservation_id,
            FakeReservation {
                product_id,
                quantity,
                confirmed: false,
            },
        );
    }

    /// Returns the available stock for a product.
    pub fn available(&self, seller_id: &SellerId, product_id: &ProductId) -> u32 {
        self.sellers
            .read()
            .unwrap()
            .get(seller_id)
            .and_then(|seller| seller.stock.get(product_id).copied())
            .unwrap_or(0)
    }

    /// Returns the number of open (unconfirmed) reservations.
    pub fn open_reservation_count(&self, seller_id: &SellerId) -> usize {
        self.sellers
            .read()
            .unwrap()
            .get(seller_id)
            .map(|seller| {
                seller
                    .reservations
                    .values()
                    .filter(|reservation| !reservation.confirmed)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Returns the number of confirmed reservations.
    pub fn confirmed_count(&self, seller_id: &SellerId) -> usize {
        self.sellers
            .read()
            .unwrap()
            .get(seller_id)
            .map(|seller| {
                seller
                    .reservations
                    .values()
                    .filter(|reservation| reservation.confirmed)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Returns the confirmed quantity of one product.
    pub fn confirmed_quantity(&self, seller_id: &SellerId, product_id: &ProductId) -> u32 {
        self.sellers
            .read()
            .unwrap()
            .get(seller_id)
            .map(|seller| {
                seller
                    .reservations
                    .values()
                    .filter(|reservation| {
                        reservation.confirmed && reservation.product_id == *product_id
                    })
                    .map(|reservation| reservation.quantity)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Returns every reservation ID that received a cancel, in order.
    pub fn cancel_log(&self, seller_id: &SellerId) -> Vec<ReservationId> {
        self.sellers
            .read()
            .unwrap()
            .get(seller_id)
            .map(|seller| seller.cancel_log.clone())
            .unwrap_or_default()
    }

    /// Checks the local conservation invariant for one product:
    /// available + open reservations + confirmed quantities == initial.
    pub fn invariant_holds(
        &self,
        seller_id: &SellerId,
        product_id: &ProductId,
        initial_stock: u32,
    ) -> bool {
        let sellers = self.sellers.read().unwrap();
        let Some(seller) = sellers.get(seller_id) else {
            return false;
        };
        let available = seller.stock.get(product_id).copied().unwrap_or(0);
        let held: u32 = seller
            .reservations
            .values()
            .filter(|reservation| reservation.product_id == *product_id)
            .map(|reservation| reservation.quantity)
            .sum();
        available + held == initial_stock
    }
}

#[async_trait]
impl SellerApi for InMemorySellerNetwork {
    async fn reserve(
        &self,
        seller_id: &SellerId,
        _order_id: &OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReservationId, SellerCallError> {
        let mut sellers = self.sellers.write().unwrap();
        let seller = sellers
            .get_mut(seller_id)
            .ok_or_else(|| SellerCallError::Rejected {
                seller: seller_id.clone(),
                operation: "reserve",
                reason: "unknown seller".into(),
            })?;

        if quantity == 0 {
            return Err(SellerCallError::Rejected {
                seller: seller_id.clone(),
                operation: "reserve",
                reason: "invalid quantity".into(),
            });
        }

        if seller.reject_reserves > 0 {
            seller.reject_reserves -= 1;
            return Err(SellerCallError::Rejected {
                seller: seller_id.clone(),
                operation: "reserve",
                reason: "insufficient stock".into(),
            });
        }

        let available =
            seller
                .stock
                .get_mut(product_id)
                .ok_or_else(|| SellerCallError::Rejected {
                    seller: seller_id.clone(),
                    operation: "reserve",
                    reason: "unknown product".into(),
                })?;
        if *available < quantity {
            return Err(SellerCallError::Rejected {
                seller: seller_id.clone(),
                operation: "reserve",
                reason: "insufficient stock".into(),
            });
        }

        *available -= quantity;
        seller.next_id += 1;
        let reservation_id = ReservationId::new(format!("{seller_id}-R{}", seller.next_id));
        seller.reservations.insert(
            reservation_id.clone(),
            FakeReservation {
                product_id: product_id.clone(),
                quantity,
                confirmed: false,
            },
        );
        Ok(reservation_id)
    }

    async fn confirm(
        &self,
        seller_id: &SellerId,
        reservation_id: &ReservationId,
    ) -> Result<(), SellerCallError> {
        let mut sellers = self.sellers.write().unwrap();
        let seller = sellers
            .get_mut(seller_id)
            .ok_or_else(|| SellerCallError::Rejected {
                seller: seller_id.clone(),
                operation: "confirm",
                reason: "unknown seller".into(),
            })?;

        if seller.fail_confirms {
            return Err(SellerCallError::Rejected {
                seller: seller_id.clone(),
                operation: "confirm",
                reason: "reservation expired".into(),
            });
        }

        match seller.reservations.get_mut(reservation_id) {
            Some(reservation) if !reservation.confirmed => {
                reservation.confirmed = true;
                Ok(())
            }
            Some(_) => Err(SellerCallError::Rejected {
                seller: seller_id.clone(),
                operation: "confirm",
                reason: "already confirmed".into(),
            }),
            None => Err(SellerCallError::Rejected {
                seller: seller_id.clone(),
                operation: "confirm",
                reason: "unknown reservation".into(),
            }),
        }
    }

    async fn cancel(
        &self,
        seller_id: &SellerId,
        reservation_id: &ReservationId,
    ) -> Result<(), SellerCallError> {
        let mut sellers = self.sellers.write().unwrap();
        let seller = sellers
            .get_mut(seller_id)
            .ok_or_else(|| SellerCallError::Rejected {
                seller: seller_id.clone(),
                operation: "cancel",
                reason: "unknown seller".into(),
            })?;

        seller.cancel_log.push(reservation_id.clone());
        match seller.reservations.get(reservation_id) {
            Some(reservation) if reservation.confirmed => Err(SellerCallError::Rejected {
                seller: seller_id.clone(),
                operation: "cancel",
                reason: "already confirmed".into(),
            }),
            Some(_) => {
                let reservation = seller.reservations.remove(reservation_id).unwrap();
                *seller.stock.entry(reservation.product_id).or_insert(0) += reservation.quantity;
                Ok(())
            }
            // Idempotent: cancelling an absent or expired reservation
            // succeeds.
            None => Ok(()),
        }
    }
}
