//! Custom Test Assertions
//!
//! Assertion helpers for inventory types that print both sides of a
//! failed comparison in domain terms.

use core_kernel::{Quantity, TenantId};
use domain_inventory::reconciliation::{compute_balances, default_tolerance, find_mismatches};
use domain_inventory::{BalanceKey, InventoryError, InventoryResult, InventoryStore};

/// Asserts two quantities are equal within the default tolerance
pub fn assert_quantity_eq(actual: Quantity, expected: Quantity) {
    assert!(
        actual.approx_eq(expected),
        "Quantities differ: actual={}, expected={}",
        actual,
        expected
    );
}

/// Asserts a result failed with the given stable error code
pub fn assert_error_code<T: std::fmt::Debug>(result: InventoryResult<T>, code: &str) -> InventoryError {
    match result {
        Ok(value) => panic!("Expected error {}, got Ok({:?})", code, value),
        Err(err) => {
            assert_eq!(err.code(), code, "Unexpected error: {}", err);
            err
        }
    }
}

/// Asserts the stored snapshot row for `key`
///
/// A missing row is treated as all zeros.
pub async fn assert_balance<S: InventoryStore>(
    store: &S,
    tenant_id: TenantId,
    key: &BalanceKey,
    on_hand: Quantity,
    reserved: Quantity,
) {
    let snapshot = store
        .balance_snapshot(tenant_id, key)
        .await
        .expect("balance snapshot lookup failed");
    let (actual_on_hand, actual_reserved) = snapshot
        .map(|s| (s.on_hand, s.reserved))
        .unwrap_or((Quantity::zero(), Quantity::zero()));

    assert!(
        actual_on_hand.approx_eq(on_hand) && actual_reserved.approx_eq(reserved),
        "Balance mismatch at {}: on_hand={} (expected {}), reserved={} (expected {})",
        key,
        actual_on_hand,
        on_hand,
        actual_reserved,
        reserved
    );
}

/// Asserts the ledger-derived on-hand for `key`
pub async fn assert_ledger_on_hand<S: InventoryStore>(store: &S, tenant_id: TenantId, key: &BalanceKey, expected: Quantity) {
    let totals = store.ledger_totals(tenant_id).await.expect("ledger totals failed");
    let actual = totals
        .into_iter()
        .find(|total| &total.key == key)
        .map_or_else(Quantity::zero, |total| total.on_hand);

    assert_quantity_eq(actual, expected);
}

/// Asserts the snapshot agrees with the ledger and reservations for every key
pub async fn assert_reconciled<S: InventoryStore>(store: &S, tenant_id: TenantId) {
    let ledger = store.ledger_totals(tenant_id).await.expect("ledger totals failed");
    let reservations = store
        .reservation_totals(tenant_id)
        .await
        .expect("reservation totals failed");
    let snapshots = store.balance_snapshots(tenant_id).await.expect("snapshot scan failed");

    let mismatches = find_mismatches(tenant_id, &ledger, &reservations, &snapshots, default_tolerance());
    assert!(
        mismatches.is_empty(),
        "Snapshot drifted from ledger on {} key(s): {:?}",
        mismatches.len(),
        mismatches
    );
}

/// Asserts that no computed balance for the tenant is negative
pub async fn assert_no_negative_balances<S: InventoryStore>(store: &S, tenant_id: TenantId) {
    let ledger = store.ledger_totals(tenant_id).await.expect("ledger totals failed");
    let reservations = store
        .reservation_totals(tenant_id)
        .await
        .expect("reservation totals failed");

    for balance in compute_balances(&ledger, &reservations).into_values() {
        assert!(
            !balance.on_hand.is_negative(),
            "Negative on-hand {} at {}",
            balance.on_hand,
            balance.key
        );
    }
}
