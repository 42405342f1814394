//! Reservations: demand-linked holds on inventory
//!
//! ```text
//! RESERVED ──► ALLOCATED ──► FULFILLED
//!    │             │
//!    └──────┬──────┘
//!           ▼
//!   CANCELLED / EXPIRED
//! ```
//!
//! Terminal states are final. While open, a reservation contributes its
//! unfulfilled quantity to the snapshot's `reserved` metric, and once
//! allocated also to `allocated`. Every transition returns the snapshot
//! delta it implies so the caller can project it in the same transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{ItemId, LocationId, Quantity, ReservationId, TenantId};

use crate::balance::{BalanceDelta, BalanceKey};
use crate::error::InventoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Reserved,
    Allocated,
    Fulfilled,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "RESERVED",
            ReservationStatus::Allocated => "ALLOCATED",
            ReservationStatus::Fulfilled => "FULFILLED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ReservationStatus::Reserved | ReservationStatus::Allocated)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    fn can_transition_to(&self, target: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (*self, target),
            (Reserved, Allocated)
                | (Allocated, Fulfilled)
                | (Reserved, Cancelled)
                | (Allocated, Cancelled)
                | (Reserved, Expired)
                | (Allocated, Expired)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESERVED" => Ok(ReservationStatus::Reserved),
            "ALLOCATED" => Ok(ReservationStatus::Allocated),
            "FULFILLED" => Ok(ReservationStatus::Fulfilled),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            "EXPIRED" => Ok(ReservationStatus::Expired),
            other => Err(InventoryError::validation(format!("unknown reservation status '{}'", other))),
        }
    }
}

/// Request to place a hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub uom: String,
    pub quantity: Quantity,
    /// The demand the hold serves, e.g. a sales order line
    pub demand_ref: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewReservation {
    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.uom.trim().is_empty() {
            return Err(InventoryError::validation("reservation is missing a unit of measure"));
        }
        if !self.quantity.is_positive() {
            return Err(InventoryError::validation("reservation quantity must be positive"));
        }
        if self.demand_ref.trim().is_empty() {
            return Err(InventoryError::validation("reservation needs a demand reference"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub tenant_id: TenantId,
    pub key: BalanceKey,
    pub demand_ref: String,
    pub status: ReservationStatus,
    pub quantity_reserved: Quantity,
    pub quantity_fulfilled: Quantity,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a hold and the snapshot delta for it
    pub fn reserve(tenant_id: TenantId, request: NewReservation, now: DateTime<Utc>) -> (Self, BalanceDelta) {
        let reservation = Self {
            id: ReservationId::new_v7(),
            tenant_id,
            key: BalanceKey::new(request.item_id, request.location_id, request.uom),
            demand_ref: request.demand_ref,
            status: ReservationStatus::Reserved,
            quantity_reserved: request.quantity,
            quantity_fulfilled: Quantity::zero(),
            expires_at: request.expires_at,
            created_at: now,
            updated_at: now,
        };
        let delta = BalanceDelta::reserved(reservation.quantity_reserved);
        (reservation, delta)
    }

    /// Quantity still held
    pub fn open_quantity(&self) -> Quantity {
        (self.quantity_reserved - self.quantity_fulfilled).clamp_non_negative()
    }

    /// What this reservation currently contributes to the snapshot
    pub fn contribution(&self) -> BalanceDelta {
        let open = self.open_quantity();
        match self.status {
            ReservationStatus::Reserved => BalanceDelta::reserved(open),
            ReservationStatus::Allocated => BalanceDelta {
                on_hand: Quantity::zero(),
                reserved: open,
                allocated: open,
            },
            _ => BalanceDelta::default(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.expires_at.map_or(false, |at| at <= now)
    }

    pub fn allocate(&mut self, now: DateTime<Utc>) -> Result<BalanceDelta, InventoryError> {
        self.transition(ReservationStatus::Allocated, now)
    }

    /// Records fulfilment of part or all of the hold
    ///
    /// The reservation becomes FULFILLED once nothing remains open. The
    /// returned delta releases the fulfilled quantity from both metrics.
    pub fn fulfill(&mut self, quantity: Quantity, now: DateTime<Utc>) -> Result<BalanceDelta, InventoryError> {
        if self.status != ReservationStatus::Allocated {
            return Err(self.invalid_transition(ReservationStatus::Fulfilled));
        }
        if !quantity.is_positive() {
            return Err(InventoryError::validation("fulfilled quantity must be positive"));
        }
        if quantity.exceeds(self.open_quantity()) {
            return Err(InventoryError::QuantityExceeded {
                requested: quantity,
                available: self.open_quantity(),
            });
        }

        let before = self.contribution();
        self.quantity_fulfilled = (self.quantity_fulfilled + quantity).min(self.quantity_reserved);
        if self.open_quantity().is_zero() {
            self.status = ReservationStatus::Fulfilled;
        }
        self.updated_at = now;
        Ok(difference(self.contribution(), before))
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<BalanceDelta, InventoryError> {
        self.transition(ReservationStatus::Cancelled, now)
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<BalanceDelta, InventoryError> {
        self.transition(ReservationStatus::Expired, now)
    }

    fn transition(&mut self, target: ReservationStatus, now: DateTime<Utc>) -> Result<BalanceDelta, InventoryError> {
        if !self.status.can_transition_to(target) {
            return Err(self.invalid_transition(target));
        }
        let before = self.contribution();
        self.status = target;
        self.updated_at = now;
        Ok(difference(self.contribution(), before))
    }

    fn invalid_transition(&self, target: ReservationStatus) -> InventoryError {
        InventoryError::InvalidStatusTransition {
            entity: "reservation",
            from: self.status.to_string(),
            to: target.to_string(),
        }
    }
}

fn difference(after: BalanceDelta, before: BalanceDelta) -> BalanceDelta {
    BalanceDelta {
        on_hand: after.on_hand - before.on_hand,
        reserved: after.reserved - before.reserved,
        allocated: after.allocated - before.allocated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(quantity: i64) -> Reservation {
        let request = NewReservation {
            item_id: ItemId::new(),
            location_id: LocationId::new(),
            uom: "ea".into(),
            quantity: Quantity::from_i64(quantity),
            demand_ref: "SO-1/1".into(),
            expires_at: None,
        };
        Reservation::reserve(TenantId::new(), request, Utc::now()).0
    }

    #[test]
    fn test_allocate_moves_open_quantity_into_allocated() {
        let mut r = reservation(10);
        let delta = r.allocate(Utc::now()).unwrap();
        assert_eq!(delta.reserved, Quantity::zero());
        assert_eq!(delta.allocated, Quantity::from_i64(10));
    }

    #[test]
    fn test_partial_then_full_fulfilment() {
        let mut r = reservation(10);
        r.allocate(Utc::now()).unwrap();

        let partial = r.fulfill(Quantity::from_i64(4), Utc::now()).unwrap();
        assert_eq!(r.status, ReservationStatus::Allocated);
        assert_eq!(partial.reserved, Quantity::from_i64(-4));
        assert_eq!(partial.allocated, Quantity::from_i64(-4));

        r.fulfill(Quantity::from_i64(6), Utc::now()).unwrap();
        assert_eq!(r.status, ReservationStatus::Fulfilled);
        assert_eq!(r.contribution(), BalanceDelta::default());
    }

    #[test]
    fn test_cannot_overfulfil() {
        let mut r = reservation(10);
        r.allocate(Utc::now()).unwrap();
        assert_eq!(r.fulfill(Quantity::from_i64(11), Utc::now()).unwrap_err().code(), "QUANTITY_EXCEEDED");
    }

    #[test]
    fn test_fulfil_requires_allocation() {
        let mut r = reservation(10);
        assert!(matches!(
            r.fulfill(Quantity::from_i64(1), Utc::now()),
            Err(InventoryError::InvalidStatusTransition { .. })
        ));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut r = reservation(10);
        let released = r.cancel(Utc::now()).unwrap();
        assert_eq!(released.reserved, Quantity::from_i64(-10));

        assert!(r.allocate(Utc::now()).is_err());
        assert!(r.expire(Utc::now()).is_err());
        assert!(r.cancel(Utc::now()).is_err());
    }

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();
        let mut r = reservation(1);
        r.expires_at = Some(now - chrono::Duration::minutes(1));
        assert!(r.is_expired_at(now));
        r.expire(now).unwrap();
        assert!(!r.is_expired_at(now));
    }
}
