//! Ledger-to-snapshot reconciliation against live postings

mod common;

use common::{key, qty, Harness};
use core_kernel::{ItemId, LocationId, Quantity};
use domain_inventory::reconciliation::default_tolerance;
use domain_inventory::{
    BalanceKey, BalanceSnapshot, InventoryError, MismatchSource, NewReservation, ReconcileMode, ReconcileOptions,
};

fn options(mode: ReconcileMode) -> ReconcileOptions {
    ReconcileOptions {
        mode,
        actor: "test-suite".into(),
        ..ReconcileOptions::default()
    }
}

async fn overwrite(h: &Harness, key: &BalanceKey, on_hand: i64, reserved: i64) {
    let mut row = h
        .snapshot(key)
        .await
        .unwrap_or_else(|| BalanceSnapshot::empty(h.tenant, key.clone(), chrono::Utc::now()));
    row.on_hand = qty(on_hand);
    row.reserved = qty(reserved);
    h.store.overwrite_balance(row).await;
}

#[tokio::test]
async fn test_receipt_then_adjustment_drift_is_reported_and_repaired() {
    let h = Harness::new();
    let item = ItemId::new();
    let location = LocationId::new();
    let k = BalanceKey::new(item, location, "ea");

    h.receive(location, item, 100).await;
    h.adjust(&k, -30).await;
    assert!(h.reconciler.compare_balances(h.tenant, default_tolerance()).await.unwrap().is_empty());

    overwrite(&h, &k, 65, 0).await;
    let mismatches = h.reconciler.compare_balances(h.tenant, default_tolerance()).await.unwrap();
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].computed_on_hand, qty(70));
    assert_eq!(mismatches[0].on_hand_drift(), qty(5));
    assert_eq!(mismatches[0].source, MismatchSource::LedgerOnly);

    let report = h.reconciler.reconcile(h.tenant, &options(ReconcileMode::Repair)).await.unwrap();
    assert_eq!(report.mismatch_count, 1);
    assert_eq!(report.repair.map(|r| r.repaired_count), Some(1));
    assert!(report.is_clean());
    assert_eq!(h.on_hand(&k).await, qty(70));

    let repairs = h.store.repairs(h.tenant).await;
    assert_eq!(repairs.len(), 1);
    assert_eq!(repairs[0].previous_on_hand, qty(65));
    assert_eq!(repairs[0].on_hand, qty(70));
    assert_eq!(repairs[0].run_id, report.run_id);
    assert_eq!(repairs[0].actor, "test-suite");
}

#[tokio::test]
async fn test_report_mode_never_mutates() {
    let h = Harness::new();
    let k = key();
    h.adjust(&k, 10).await;
    overwrite(&h, &k, 12, 0).await;

    let report = h.reconciler.reconcile(h.tenant, &options(ReconcileMode::Report)).await.unwrap();
    assert_eq!(report.mismatch_count, 1);
    assert_eq!(report.remaining_count, 1);
    assert!(report.repair.is_none());
    assert_eq!(h.on_hand(&k).await, qty(12));
    assert!(h.store.repairs(h.tenant).await.is_empty());
}

#[tokio::test]
async fn test_drift_within_tolerance_is_ignored() {
    let h = Harness::new();
    let k = key();
    h.adjust(&k, 10).await;

    let mut row = h.snapshot(&k).await.unwrap();
    row.on_hand = Quantity::parse("10.000001").unwrap();
    h.store.overwrite_balance(row).await;

    assert!(h.reconciler.compare_balances(h.tenant, default_tolerance()).await.unwrap().is_empty());
    assert_eq!(h.reconciler.compare_balances(h.tenant, Quantity::zero()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_each_join_side_is_attributed() {
    let h = Harness::new();

    // Ledger only: the snapshot row is missing entirely.
    let ledger_only = key();
    h.adjust(&ledger_only, 6).await;
    h.store.delete_balance(h.tenant, &ledger_only).await;

    // Ledger and reservation: reserved drifted while on-hand is right.
    let both = key();
    h.adjust(&both, 10).await;
    h.reservations
        .create_reservation(
            h.tenant,
            NewReservation {
                item_id: both.item_id,
                location_id: both.location_id,
                uom: both.uom.clone(),
                quantity: qty(4),
                demand_ref: "SO-1/1".into(),
                expires_at: None,
            },
        )
        .await
        .unwrap();
    overwrite(&h, &both, 10, 0).await;

    // Reservation only: stock that never went through the ledger.
    let reservation_only = key();
    overwrite(&h, &reservation_only, 5, 0).await;
    h.reservations
        .create_reservation(
            h.tenant,
            NewReservation {
                item_id: reservation_only.item_id,
                location_id: reservation_only.location_id,
                uom: reservation_only.uom.clone(),
                quantity: qty(3),
                demand_ref: "SO-2/1".into(),
                expires_at: None,
            },
        )
        .await
        .unwrap();

    // Snapshot only: a stray row with no activity behind it.
    let snapshot_only = key();
    overwrite(&h, &snapshot_only, 2, 0).await;

    let mismatches = h.reconciler.compare_balances(h.tenant, default_tolerance()).await.unwrap();
    let source_of = |k: &BalanceKey| mismatches.iter().find(|m| &m.key == k).map(|m| m.source);

    assert_eq!(mismatches.len(), 4);
    assert_eq!(source_of(&ledger_only), Some(MismatchSource::LedgerOnly));
    assert_eq!(source_of(&both), Some(MismatchSource::LedgerAndReservation));
    assert_eq!(source_of(&reservation_only), Some(MismatchSource::ReservationOnly));
    assert_eq!(source_of(&snapshot_only), Some(MismatchSource::SnapshotOnly));

    let missing = mismatches.iter().find(|m| m.key == ledger_only).unwrap();
    assert!(!missing.stored_present);
    let drifted = mismatches.iter().find(|m| m.key == both).unwrap();
    assert_eq!(drifted.reserved_drift(), qty(4));
    assert_eq!(drifted.on_hand_drift(), Quantity::zero());

    h.reconciler.reconcile(h.tenant, &options(ReconcileMode::Repair)).await.unwrap();
    assert!(h.reconciler.compare_balances(h.tenant, default_tolerance()).await.unwrap().is_empty());
    assert_eq!(h.on_hand(&snapshot_only).await, Quantity::zero());
}

#[tokio::test]
async fn test_strict_mode_fails_with_remaining_count() {
    let h = Harness::new();
    let k = key();
    h.adjust(&k, 3).await;
    overwrite(&h, &k, 1, 0).await;

    let err = h.reconciler.reconcile(h.tenant, &options(ReconcileMode::Strict)).await.unwrap_err();
    match err {
        InventoryError::ReconciliationFailed { tenant_id, mismatch_count } => {
            assert_eq!(tenant_id, h.tenant);
            assert_eq!(mismatch_count, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    let repaired_first = ReconcileOptions {
        repair_before_strict: true,
        ..options(ReconcileMode::Strict)
    };
    let report = h.reconciler.reconcile(h.tenant, &repaired_first).await.unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_repair_respects_row_cap() {
    let h = Harness::new();
    let keys = [key(), key(), key()];
    for k in &keys {
        h.adjust(k, 5).await;
        overwrite(&h, k, 1, 0).await;
    }

    let capped = ReconcileOptions {
        max_repair_rows: Some(2),
        ..options(ReconcileMode::Repair)
    };
    let report = h.reconciler.reconcile(h.tenant, &capped).await.unwrap();
    let outcome = report.repair.unwrap();
    assert_eq!(outcome.repaired_count, 2);
    assert_eq!(outcome.skipped_count, 1);
    assert_eq!(report.remaining_count, 1);
}

#[tokio::test]
async fn test_report_keeps_first_n_mismatches() {
    let h = Harness::new();
    for _ in 0..4 {
        let k = key();
        h.adjust(&k, 2).await;
        h.store.delete_balance(h.tenant, &k).await;
    }

    let limited = ReconcileOptions {
        max_reported: 2,
        ..options(ReconcileMode::Report)
    };
    let report = h.reconciler.reconcile(h.tenant, &limited).await.unwrap();
    assert_eq!(report.mismatch_count, 4);
    assert_eq!(report.mismatches.len(), 2);
}

#[tokio::test]
async fn test_bootstrap_seeds_snapshot_from_ledger() {
    let h = Harness::new();
    let k = key();
    h.adjust(&k, 9).await;
    h.adjust(&k, -2).await;
    h.store.delete_balance(h.tenant, &k).await;

    let report = h.reconciler.bootstrap_balances(h.tenant, "bootstrap").await.unwrap();
    assert_eq!(report.mode, ReconcileMode::Repair);
    assert!(report.is_clean());
    assert_eq!(h.on_hand(&k).await, qty(7));
}

#[tokio::test]
async fn test_reconcile_all_covers_every_tenant() {
    let h = Harness::new();
    h.adjust(&key(), 1).await;

    let results = h.reconciler.reconcile_all(&options(ReconcileMode::Report)).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, h.tenant);
    assert!(results[0].1.as_ref().unwrap().is_clean());
}
