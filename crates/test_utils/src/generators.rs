//! Property-Based Test Generators
//!
//! Proptest strategies that respect the inventory domain's invariants.

use core_kernel::{ItemId, LocationId, Quantity};
use domain_inventory::{BalanceKey, PutawayTotals, QcTotals};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Units of measure used across generated data
pub fn uom_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just("ea".to_string()), Just("case".to_string()), Just("kg".to_string())]
}

/// Quantities with up to six fractional digits, either sign
pub fn quantity_strategy() -> impl Strategy<Value = Quantity> {
    (-1_000_000_000_000i64..1_000_000_000_000i64).prop_map(|micros| Quantity::new(Decimal::new(micros, 6)))
}

/// Strictly positive quantities with up to six fractional digits
pub fn positive_quantity_strategy() -> impl Strategy<Value = Quantity> {
    (1i64..1_000_000_000_000i64).prop_map(|micros| Quantity::new(Decimal::new(micros, 6)))
}

/// Whole-unit quantities in `0..max`
pub fn whole_quantity_strategy(max: i64) -> impl Strategy<Value = Quantity> {
    (0..max.max(1)).prop_map(Quantity::from_i64)
}

/// Balance keys with random ids
pub fn balance_key_strategy() -> impl Strategy<Value = BalanceKey> {
    (any::<u128>(), any::<u128>(), uom_strategy()).prop_map(|(item, location, uom)| {
        BalanceKey::new(
            ItemId::from(Uuid::from_u128(item)),
            LocationId::from(Uuid::from_u128(location)),
            uom,
        )
    })
}

/// Adjustment deltas whose running sum never goes below zero
pub fn non_negative_delta_sequence_strategy(len: usize) -> impl Strategy<Value = Vec<Quantity>> {
    proptest::collection::vec(-500i64..1_000i64, 1..=len.max(1)).prop_map(|raw| {
        let mut running = 0i64;
        raw.into_iter()
            .filter_map(|delta| {
                let delta = if running + delta < 0 { -running } else { delta };
                running += delta;
                (delta != 0).then(|| Quantity::from_i64(delta))
            })
            .collect()
    })
}

/// A received quantity with QC and putaway totals that stay within it
pub fn receipt_line_state_strategy() -> impl Strategy<Value = (Quantity, QcTotals, PutawayTotals)> {
    (1i64..10_000)
        .prop_flat_map(|received| (Just(received), 0..=received))
        .prop_flat_map(|(received, accepted)| (Just(received), Just(accepted), 0..=(received - accepted)))
        .prop_flat_map(|(received, accepted, held)| {
            (
                Just(received),
                Just(accepted),
                Just(held),
                0..=(received - accepted - held),
                0..=accepted,
            )
        })
        .prop_flat_map(|(received, accepted, held, rejected, posted)| {
            (
                Just(received),
                Just(accepted),
                Just(held),
                Just(rejected),
                Just(posted),
                0..=(accepted - posted),
            )
        })
        .prop_map(|(received, accepted, held, rejected, posted, pending)| {
            let qc = QcTotals {
                hold: Quantity::from_i64(held),
                accept: Quantity::from_i64(accepted),
                reject: Quantity::from_i64(rejected),
            };
            let putaway = PutawayTotals {
                posted: Quantity::from_i64(posted),
                pending: Quantity::from_i64(pending),
            };
            (Quantity::from_i64(received), qc, putaway)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_quantities_stay_at_fixed_scale(q in quantity_strategy()) {
            prop_assert!(q.as_decimal().scale() <= 6);
        }

        #[test]
        fn test_positive_quantities_are_positive(q in positive_quantity_strategy()) {
            prop_assert!(q.is_positive());
        }

        #[test]
        fn test_delta_sequences_never_dip_below_zero(deltas in non_negative_delta_sequence_strategy(20)) {
            let mut running = Quantity::zero();
            for delta in deltas {
                running += delta;
                prop_assert!(!running.is_negative());
            }
        }

        #[test]
        fn test_receipt_line_states_are_consistent((received, qc, putaway) in receipt_line_state_strategy()) {
            prop_assert!(!(qc.hold + qc.accept + qc.reject).exceeds(received));
            prop_assert!(!(putaway.posted + putaway.pending).exceeds(qc.accept));
        }
    }
}
