//! Materialized balance projection
//!
//! A `BalanceSnapshot` caches on-hand, reserved and allocated quantity per
//! (tenant, item, location, uom). The ledger is authoritative; the snapshot
//! is kept in step by postings and corrected by the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use core_kernel::{ItemId, LocationId, Quantity, TenantId};

use crate::error::InventoryError;

/// Grouping key shared by the ledger, reservations and the snapshot
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub uom: String,
}

impl BalanceKey {
    pub fn new(item_id: ItemId, location_id: LocationId, uom: impl Into<String>) -> Self {
        Self {
            item_id,
            location_id,
            uom: uom.into(),
        }
    }
}

impl fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} [{}]", self.item_id, self.location_id, self.uom)
    }
}

/// A signed change to the three snapshot metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub on_hand: Quantity,
    pub reserved: Quantity,
    pub allocated: Quantity,
}

impl BalanceDelta {
    pub fn on_hand(quantity: Quantity) -> Self {
        Self {
            on_hand: quantity,
            ..Default::default()
        }
    }

    pub fn reserved(quantity: Quantity) -> Self {
        Self {
            reserved: quantity,
            ..Default::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        self.on_hand.is_zero() && self.reserved.is_zero() && self.allocated.is_zero()
    }
}

impl std::ops::Add for BalanceDelta {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            on_hand: self.on_hand + other.on_hand,
            reserved: self.reserved + other.reserved,
            allocated: self.allocated + other.allocated,
        }
    }
}

impl std::ops::AddAssign for BalanceDelta {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

/// One row of the balance projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub tenant_id: TenantId,
    pub key: BalanceKey,
    pub on_hand: Quantity,
    pub reserved: Quantity,
    pub allocated: Quantity,
    pub updated_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    /// An all-zero row, used when no snapshot exists yet for a key
    pub fn empty(tenant_id: TenantId, key: BalanceKey, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            key,
            on_hand: Quantity::zero(),
            reserved: Quantity::zero(),
            allocated: Quantity::zero(),
            updated_at: now,
        }
    }

    /// Applies a delta, refusing any result that leaves a metric negative
    pub fn apply(&mut self, delta: BalanceDelta, now: DateTime<Utc>) -> Result<(), InventoryError> {
        let next = Self {
            on_hand: self.on_hand + delta.on_hand,
            reserved: self.reserved + delta.reserved,
            allocated: self.allocated + delta.allocated,
            updated_at: now,
            ..self.clone()
        };
        next.ensure_non_negative()?;
        *self = next;
        Ok(())
    }

    /// Checks the non-negativity invariant on all three metrics
    pub fn ensure_non_negative(&self) -> Result<(), InventoryError> {
        if self.on_hand.is_negative() || self.reserved.is_negative() || self.allocated.is_negative() {
            return Err(InventoryError::NegativeBalance {
                key: self.key.clone(),
                on_hand: self.on_hand,
                reserved: self.reserved,
                allocated: self.allocated,
            });
        }
        Ok(())
    }

    /// On-hand quantity not already promised to a reservation
    pub fn available(&self) -> Quantity {
        (self.on_hand - self.reserved).clamp_non_negative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> BalanceSnapshot {
        BalanceSnapshot::empty(
            TenantId::new(),
            BalanceKey::new(ItemId::new(), LocationId::new(), "ea"),
            Utc::now(),
        )
    }

    #[test]
    fn test_apply_accumulates() {
        let mut row = snapshot();
        row.apply(BalanceDelta::on_hand(Quantity::from_i64(100)), Utc::now()).unwrap();
        row.apply(BalanceDelta::on_hand(Quantity::from_i64(-30)), Utc::now()).unwrap();
        assert_eq!(row.on_hand, Quantity::from_i64(70));
    }

    #[test]
    fn test_apply_rejects_negative_and_leaves_row_untouched() {
        let mut row = snapshot();
        row.apply(BalanceDelta::on_hand(Quantity::from_i64(10)), Utc::now()).unwrap();

        let result = row.apply(BalanceDelta::on_hand(Quantity::from_i64(-11)), Utc::now());
        assert!(matches!(result, Err(InventoryError::NegativeBalance { .. })));
        assert_eq!(row.on_hand, Quantity::from_i64(10));
    }

    #[test]
    fn test_available_excludes_reserved() {
        let mut row = snapshot();
        row.apply(
            BalanceDelta {
                on_hand: Quantity::from_i64(10),
                reserved: Quantity::from_i64(4),
                allocated: Quantity::zero(),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(row.available(), Quantity::from_i64(6));
    }
}
