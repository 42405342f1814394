//! Ledger-to-snapshot reconciliation
//!
//! The ledger is ground truth. Truth for a key is the full outer join of
//! two independent aggregates:
//!
//! - signed movement-line deltas grouped by (item, location, uom)
//! - open reservation quantity grouped the same way
//!
//! The result is then joined against the stored snapshot (a missing row
//! reads as zeros) and every key whose on-hand or reserved drift exceeds
//! the tolerance is reported. Each mismatch records which side of the join
//! produced the key, so a ledger-only key, a reservation-only key and a
//! stray snapshot row are told apart.

use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use core_kernel::{BalanceRepairId, Quantity, ReconciliationRunId, TenantId};

use crate::balance::{BalanceKey, BalanceSnapshot};
use crate::error::InventoryError;

/// Ledger-derived on-hand for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotal {
    pub key: BalanceKey,
    pub on_hand: Quantity,
}

/// Open reservation totals for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationTotal {
    pub key: BalanceKey,
    pub reserved: Quantity,
    pub allocated: Quantity,
}

/// Which inputs contributed a key to the comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchSource {
    LedgerOnly,
    ReservationOnly,
    LedgerAndReservation,
    /// Only the snapshot has a row for the key
    SnapshotOnly,
}

impl MismatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MismatchSource::LedgerOnly => "ledger_only",
            MismatchSource::ReservationOnly => "reservation_only",
            MismatchSource::LedgerAndReservation => "ledger_and_reservation",
            MismatchSource::SnapshotOnly => "snapshot_only",
        }
    }
}

impl fmt::Display for MismatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MismatchSource {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ledger_only" => Ok(MismatchSource::LedgerOnly),
            "reservation_only" => Ok(MismatchSource::ReservationOnly),
            "ledger_and_reservation" => Ok(MismatchSource::LedgerAndReservation),
            "snapshot_only" => Ok(MismatchSource::SnapshotOnly),
            other => Err(InventoryError::validation(format!("unknown mismatch source '{}'", other))),
        }
    }
}

/// Ledger truth for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedBalance {
    pub key: BalanceKey,
    pub on_hand: Quantity,
    pub reserved: Quantity,
    pub allocated: Quantity,
    pub source: MismatchSource,
}

/// A key whose stored snapshot disagrees with the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceMismatch {
    pub tenant_id: TenantId,
    pub key: BalanceKey,
    pub source: MismatchSource,
    pub stored_present: bool,
    pub stored_on_hand: Quantity,
    pub stored_reserved: Quantity,
    pub stored_allocated: Quantity,
    pub computed_on_hand: Quantity,
    pub computed_reserved: Quantity,
    pub computed_allocated: Quantity,
}

impl BalanceMismatch {
    /// `computed - stored` for on-hand
    pub fn on_hand_drift(&self) -> Quantity {
        self.computed_on_hand - self.stored_on_hand
    }

    /// `computed - stored` for reserved
    pub fn reserved_drift(&self) -> Quantity {
        self.computed_reserved - self.stored_reserved
    }

    /// The snapshot row that would make this key agree with the ledger
    pub fn repaired_snapshot(&self, now: DateTime<Utc>) -> BalanceSnapshot {
        BalanceSnapshot {
            tenant_id: self.tenant_id,
            key: self.key.clone(),
            on_hand: self.computed_on_hand,
            reserved: self.computed_reserved,
            allocated: self.computed_allocated,
            updated_at: now,
        }
    }
}

/// Full outer join of ledger and reservation aggregates
pub fn compute_balances(
    ledger: &[LedgerTotal],
    reservations: &[ReservationTotal],
) -> BTreeMap<BalanceKey, ComputedBalance> {
    let mut computed: BTreeMap<BalanceKey, ComputedBalance> = BTreeMap::new();

    for total in ledger {
        let entry = computed.entry(total.key.clone()).or_insert_with(|| ComputedBalance {
            key: total.key.clone(),
            on_hand: Quantity::zero(),
            reserved: Quantity::zero(),
            allocated: Quantity::zero(),
            source: MismatchSource::LedgerOnly,
        });
        entry.on_hand += total.on_hand;
    }

    for total in reservations {
        let entry = computed.entry(total.key.clone()).or_insert_with(|| ComputedBalance {
            key: total.key.clone(),
            on_hand: Quantity::zero(),
            reserved: Quantity::zero(),
            allocated: Quantity::zero(),
            source: MismatchSource::ReservationOnly,
        });
        entry.reserved += total.reserved;
        entry.allocated += total.allocated;
        if entry.source == MismatchSource::LedgerOnly {
            entry.source = MismatchSource::LedgerAndReservation;
        }
    }

    computed
}

/// Compares ledger truth to the stored snapshot
///
/// Results are ordered by key. A key is reported when either on-hand or
/// reserved differs by more than `tolerance`; allocated is carried along
/// for repair but does not decide a mismatch on its own.
pub fn find_mismatches(
    tenant_id: TenantId,
    ledger: &[LedgerTotal],
    reservations: &[ReservationTotal],
    snapshots: &[BalanceSnapshot],
    tolerance: Quantity,
) -> Vec<BalanceMismatch> {
    let computed = compute_balances(ledger, reservations);
    let stored: BTreeMap<&BalanceKey, &BalanceSnapshot> =
        snapshots.iter().map(|snapshot| (&snapshot.key, snapshot)).collect();

    let mut mismatches = Vec::new();

    for (key, truth) in &computed {
        let row = stored.get(key);
        let mismatch = BalanceMismatch {
            tenant_id,
            key: key.clone(),
            source: truth.source,
            stored_present: row.is_some(),
            stored_on_hand: row.map_or_else(Quantity::zero, |r| r.on_hand),
            stored_reserved: row.map_or_else(Quantity::zero, |r| r.reserved),
            stored_allocated: row.map_or_else(Quantity::zero, |r| r.allocated),
            computed_on_hand: truth.on_hand,
            computed_reserved: truth.reserved,
            computed_allocated: truth.allocated,
        };
        if drifted(&mismatch, tolerance) {
            mismatches.push(mismatch);
        }
    }

    for (key, row) in stored {
        if computed.contains_key(key) {
            continue;
        }
        let mismatch = BalanceMismatch {
            tenant_id,
            key: key.clone(),
            source: MismatchSource::SnapshotOnly,
            stored_present: true,
            stored_on_hand: row.on_hand,
            stored_reserved: row.reserved,
            stored_allocated: row.allocated,
            computed_on_hand: Quantity::zero(),
            computed_reserved: Quantity::zero(),
            computed_allocated: Quantity::zero(),
        };
        if drifted(&mismatch, tolerance) {
            mismatches.push(mismatch);
        }
    }

    mismatches.sort_by(|a, b| a.key.cmp(&b.key));
    mismatches
}

fn drifted(mismatch: &BalanceMismatch, tolerance: Quantity) -> bool {
    !mismatch.stored_on_hand.within(mismatch.computed_on_hand, tolerance)
        || !mismatch.stored_reserved.within(mismatch.computed_reserved, tolerance)
}

/// How a reconciliation pass treats what it finds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Compute and return mismatches, never mutate
    Report,
    /// Repair mismatches up to the row cap
    Repair,
    /// Fail if any mismatch remains (after an optional repair pass)
    Strict,
}

impl ReconcileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileMode::Report => "report",
            ReconcileMode::Repair => "repair",
            ReconcileMode::Strict => "strict",
        }
    }
}

impl fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconcileMode {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "report" => Ok(ReconcileMode::Report),
            "repair" => Ok(ReconcileMode::Repair),
            "strict" => Ok(ReconcileMode::Strict),
            other => Err(InventoryError::validation(format!("unknown reconcile mode '{}'", other))),
        }
    }
}

/// Default comparison tolerance: one unit in the sixth decimal place
pub fn default_tolerance() -> Quantity {
    Quantity::new(dec!(0.000001))
}

/// Parameters of a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    pub mode: ReconcileMode,
    pub tolerance: Quantity,
    /// Safety cap on rows rewritten by one pass; `None` means uncapped
    pub max_repair_rows: Option<usize>,
    /// How many mismatches to keep in the report
    pub max_reported: usize,
    /// In strict mode, repair before checking
    pub repair_before_strict: bool,
    pub actor: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            mode: ReconcileMode::Report,
            tolerance: default_tolerance(),
            max_repair_rows: Some(1_000),
            max_reported: 50,
            repair_before_strict: false,
            actor: "reconciler".to_string(),
        }
    }
}

/// Audit lineage for a repair pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOptions {
    pub run_id: ReconciliationRunId,
    pub actor: String,
    pub max_repair_rows: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub repaired_count: usize,
    /// Mismatches left alone because the cap was reached
    pub skipped_count: usize,
    /// Mismatches whose ledger truth is itself negative and cannot be written
    pub unrepairable_count: usize,
}

/// Audit row written for every repaired key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRepair {
    pub id: BalanceRepairId,
    pub tenant_id: TenantId,
    pub run_id: ReconciliationRunId,
    pub actor: String,
    pub key: BalanceKey,
    pub source: MismatchSource,
    pub previous_on_hand: Quantity,
    pub previous_reserved: Quantity,
    pub previous_allocated: Quantity,
    pub on_hand: Quantity,
    pub reserved: Quantity,
    pub allocated: Quantity,
    pub repaired_at: DateTime<Utc>,
}

impl BalanceRepair {
    pub fn for_mismatch(
        mismatch: &BalanceMismatch,
        run_id: ReconciliationRunId,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BalanceRepairId::new_v7(),
            tenant_id: mismatch.tenant_id,
            run_id,
            actor: actor.to_string(),
            key: mismatch.key.clone(),
            source: mismatch.source,
            previous_on_hand: mismatch.stored_on_hand,
            previous_reserved: mismatch.stored_reserved,
            previous_allocated: mismatch.stored_allocated,
            on_hand: mismatch.computed_on_hand,
            reserved: mismatch.computed_reserved,
            allocated: mismatch.computed_allocated,
            repaired_at: now,
        }
    }
}

/// Outcome of one reconciliation pass over a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub run_id: ReconciliationRunId,
    pub tenant_id: TenantId,
    pub mode: ReconcileMode,
    /// Mismatches found before any repair
    pub mismatch_count: usize,
    /// The first `max_reported` mismatches
    pub mismatches: Vec<BalanceMismatch>,
    pub repair: Option<RepairOutcome>,
    /// Mismatches still present at the end of the pass
    pub remaining_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.remaining_count == 0
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use core_kernel::{ItemId, LocationId};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn repaired_rows_always_compare_clean(
            rows in proptest::collection::vec((0i64..10_000, 0i64..10_000, 0i64..10_000, 0i64..10_000), 1..20)
        ) {
            let tenant = TenantId::new();
            let mut ledger = Vec::new();
            let mut reservations = Vec::new();
            let mut snapshots = Vec::new();
            for (on_hand, reserved, stale_on_hand, stale_reserved) in rows {
                let key = BalanceKey::new(ItemId::new(), LocationId::new(), "ea");
                ledger.push(LedgerTotal { key: key.clone(), on_hand: Quantity::from_i64(on_hand) });
                reservations.push(ReservationTotal {
                    key: key.clone(),
                    reserved: Quantity::from_i64(reserved),
                    allocated: Quantity::zero(),
                });
                snapshots.push(BalanceSnapshot {
                    tenant_id: tenant,
                    key,
                    on_hand: Quantity::from_i64(stale_on_hand),
                    reserved: Quantity::from_i64(stale_reserved),
                    allocated: Quantity::zero(),
                    updated_at: Utc::now(),
                });
            }

            let mismatches = find_mismatches(tenant, &ledger, &reservations, &snapshots, Quantity::zero());
            let mut repaired: BTreeMap<BalanceKey, BalanceSnapshot> =
                snapshots.into_iter().map(|s| (s.key.clone(), s)).collect();
            for mismatch in &mismatches {
                repaired.insert(mismatch.key.clone(), mismatch.repaired_snapshot(Utc::now()));
            }
            let repaired: Vec<BalanceSnapshot> = repaired.into_values().collect();

            prop_assert!(find_mismatches(tenant, &ledger, &reservations, &repaired, Quantity::zero()).is_empty());
        }
    }
}
