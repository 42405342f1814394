//! PostgreSQL adapter tests
//!
//! Each test starts its own container; run with `cargo test -- --ignored`
//! on a machine with Docker.

use chrono::Utc;
use std::sync::Arc;

use core_kernel::{AdapterHealth, Clock, FixedClock, HealthCheckable, ItemId, LocationId, Quantity, TenantId};
use domain_inventory::reconciliation::default_tolerance;
use domain_inventory::{
    AdjustmentService, BalanceReconciler, CountService, IdempotencyStatus, InventoryStore, PutawayService,
    QcEventType, ReceivingService, ReconcileMode, ReconcileOptions, ReservationService, ReservationStatus,
};
use infra_db::PostgresInventoryStore;
use test_utils::{
    assert_balance, assert_error_code, assert_ledger_on_hand, assert_reconciled, db_test, qc_event, AdjustmentBuilder,
    CountBuilder, KeyFixtures, PutawayBuilder, ReceiptBuilder, ReservationBuilder, TestDatabase,
};

fn qty(value: i64) -> Quantity {
    Quantity::from_i64(value)
}

struct Services {
    store: Arc<PostgresInventoryStore>,
    clock: FixedClock,
    tenant: TenantId,
    adjustments: AdjustmentService<PostgresInventoryStore>,
    counts: CountService<PostgresInventoryStore>,
    receiving: ReceivingService<PostgresInventoryStore>,
    putaways: PutawayService<PostgresInventoryStore>,
    reservations: ReservationService<PostgresInventoryStore>,
    reconciler: BalanceReconciler<PostgresInventoryStore>,
}

impl Services {
    fn new(db: &TestDatabase) -> Self {
        let store = Arc::new(db.store());
        let clock = FixedClock::at(Utc::now());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        Self {
            adjustments: AdjustmentService::new(store.clone(), shared.clone()),
            counts: CountService::new(store.clone(), shared.clone()),
            receiving: ReceivingService::new(store.clone(), shared.clone()),
            putaways: PutawayService::new(store.clone(), shared.clone()),
            reservations: ReservationService::new(store.clone(), shared.clone()),
            reconciler: BalanceReconciler::new(store.clone(), shared),
            store,
            clock,
            tenant: TenantId::new(),
        }
    }
}

db_test!(test_health_check_reports_healthy, |db| {
    let result = db.store().health_check().await;
    assert_eq!(result.status, AdapterHealth::Healthy);
});

db_test!(test_adjustment_posting_projects_snapshot, |db| {
    let s = Services::new(&db);
    let key = KeyFixtures::fresh();

    let draft = s
        .adjustments
        .create_adjustment(s.tenant, AdjustmentBuilder::new().line(&key, qty(10)).build())
        .await
        .unwrap();
    let posted = s.adjustments.post_adjustment(s.tenant, draft.id).await.unwrap();

    assert_eq!(posted.document.movement_id, Some(posted.movement.id));
    assert_balance(s.store.as_ref(), s.tenant, &key, qty(10), qty(0)).await;
    assert_ledger_on_hand(s.store.as_ref(), s.tenant, &key, qty(10)).await;
    assert_reconciled(s.store.as_ref(), s.tenant).await;

    let again = s.adjustments.post_adjustment(s.tenant, draft.id).await;
    assert_error_code(again, "ALREADY_POSTED");
});

db_test!(test_negative_posting_rolls_back, |db| {
    let s = Services::new(&db);
    let key = KeyFixtures::fresh();

    let stock = s
        .adjustments
        .create_adjustment(s.tenant, AdjustmentBuilder::new().line(&key, qty(3)).build())
        .await
        .unwrap();
    s.adjustments.post_adjustment(s.tenant, stock.id).await.unwrap();

    let overdraw = s
        .adjustments
        .create_adjustment(s.tenant, AdjustmentBuilder::new().line(&key, qty(-5)).build())
        .await
        .unwrap();
    assert_error_code(s.adjustments.post_adjustment(s.tenant, overdraw.id).await, "NEGATIVE_BALANCE");

    assert_balance(s.store.as_ref(), s.tenant, &key, qty(3), qty(0)).await;
    let draft = s.store.find_adjustment(s.tenant, overdraw.id).await.unwrap().unwrap();
    assert!(draft.movement_id.is_none());
});

db_test!(test_ledger_rows_are_append_only, |db| {
    let s = Services::new(&db);
    let key = KeyFixtures::fresh();
    let draft = s
        .adjustments
        .create_adjustment(s.tenant, AdjustmentBuilder::new().line(&key, qty(1)).build())
        .await
        .unwrap();
    s.adjustments.post_adjustment(s.tenant, draft.id).await.unwrap();

    let update = sqlx::query("UPDATE movement_lines SET quantity_delta = 100")
        .execute(db.pool())
        .await;
    assert!(update.is_err());
    let delete = sqlx::query("DELETE FROM movements").execute(db.pool()).await;
    assert!(delete.is_err());
    assert_ledger_on_hand(s.store.as_ref(), s.tenant, &key, qty(1)).await;
});

db_test!(test_count_posts_variance_only, |db| {
    let s = Services::new(&db);
    let key = KeyFixtures::fresh();
    let stock = s
        .adjustments
        .create_adjustment(s.tenant, AdjustmentBuilder::new().line(&key, qty(8)).build())
        .await
        .unwrap();
    s.adjustments.post_adjustment(s.tenant, stock.id).await.unwrap();

    let count = s
        .counts
        .create_count(s.tenant, CountBuilder::new().line(&key, qty(6)).build())
        .await
        .unwrap();
    let posted = s.counts.post_count(s.tenant, count.id).await.unwrap();

    assert_eq!(posted.movement.lines.len(), 1);
    assert_eq!(posted.movement.lines[0].quantity_delta, qty(-2));
    assert_balance(s.store.as_ref(), s.tenant, &key, qty(6), qty(0)).await;
});

db_test!(test_receive_inspect_and_put_away, |db| {
    let s = Services::new(&db);
    let staging = LocationId::new();
    let shelf = LocationId::new();
    let item = ItemId::new();

    let receipt = s
        .receiving
        .create_receipt(s.tenant, ReceiptBuilder::new().staging(staging).line(item, qty(10)).build(), None)
        .await
        .unwrap();
    let line_id = receipt.lines[0].id;

    s.receiving
        .record_qc_event(s.tenant, qc_event(line_id, QcEventType::Accept, qty(7)))
        .await
        .unwrap();
    s.receiving
        .record_qc_event(s.tenant, qc_event(line_id, QcEventType::Reject, qty(3)))
        .await
        .unwrap();
    let over = s
        .receiving
        .record_qc_event(s.tenant, qc_event(line_id, QcEventType::Accept, qty(1)))
        .await;
    assert_error_code(over, "QUANTITY_EXCEEDED");

    let too_much = s
        .putaways
        .create_putaway(s.tenant, PutawayBuilder::new().line(line_id, shelf, qty(8)).build())
        .await;
    assert_error_code(too_much, "QUANTITY_EXCEEDED");

    let putaway = s
        .putaways
        .create_putaway(s.tenant, PutawayBuilder::new().for_receipt(receipt.id).line(line_id, shelf, qty(7)).build())
        .await
        .unwrap();
    s.putaways.post_putaway(s.tenant, putaway.id).await.unwrap();

    let staging_key = domain_inventory::BalanceKey::new(item, staging, "ea");
    let shelf_key = domain_inventory::BalanceKey::new(item, shelf, "ea");
    assert_balance(s.store.as_ref(), s.tenant, &staging_key, qty(3), qty(0)).await;
    assert_balance(s.store.as_ref(), s.tenant, &shelf_key, qty(7), qty(0)).await;

    let availability = s.receiving.receipt_line_availability(s.tenant, line_id).await.unwrap();
    assert!(availability.available_for_planning.is_zero());

    let void = s.receiving.void_receipt(s.tenant, receipt.id, Some("wrong PO".into())).await;
    assert_error_code(void, "NOT_ELIGIBLE");
    assert_reconciled(s.store.as_ref(), s.tenant).await;
});

db_test!(test_void_and_putaway_on_one_receipt_do_not_both_succeed, |db| {
    let s = Services::new(&db);

    for _ in 0..5 {
        let receipt = s
            .receiving
            .create_receipt(s.tenant, ReceiptBuilder::new().staging(LocationId::new()).line(ItemId::new(), qty(6)).build(), None)
            .await
            .unwrap();
        let line_id = receipt.lines[0].id;

        let (void, putaway) = tokio::join!(
            s.receiving.void_receipt(s.tenant, receipt.id, None),
            s.putaways
                .create_putaway(s.tenant, PutawayBuilder::new().line(line_id, LocationId::new(), qty(6)).build()),
        );

        match (&void, &putaway) {
            (Ok(_), Err(err)) | (Err(err), Ok(_)) => assert_eq!(err.code(), "NOT_ELIGIBLE"),
            _ => panic!("exactly one of void and putaway must win: {:?} / {:?}", void.is_ok(), putaway.is_ok()),
        }
    }
    assert_reconciled(s.store.as_ref(), s.tenant).await;
});

db_test!(test_qc_event_racing_a_void_is_serialized, |db| {
    let s = Services::new(&db);

    for _ in 0..5 {
        let receipt = s
            .receiving
            .create_receipt(s.tenant, ReceiptBuilder::new().staging(LocationId::new()).line(ItemId::new(), qty(4)).build(), None)
            .await
            .unwrap();
        let line_id = receipt.lines[0].id;

        let (void, qc) = tokio::join!(
            s.receiving.void_receipt(s.tenant, receipt.id, None),
            s.receiving.record_qc_event(s.tenant, qc_event(line_id, QcEventType::Hold, qty(1))),
        );

        assert!(void.is_ok(), "a QC event does not block a void");
        if let Err(err) = qc {
            assert_eq!(err.code(), "NOT_ELIGIBLE");
        }
    }
});

db_test!(test_idempotent_receipt_replays_on_postgres, |db| {
    let s = Services::new(&db);
    let request = ReceiptBuilder::new().staging(LocationId::new()).line(ItemId::new(), qty(4)).build();

    let first = s
        .receiving
        .create_receipt(s.tenant, request.clone(), Some("po-4711".into()))
        .await
        .unwrap();
    let replay = s
        .receiving
        .create_receipt(s.tenant, request, Some("po-4711".into()))
        .await
        .unwrap();

    assert_eq!(first.id, replay.id);
    let record = s.store.find_idempotency(s.tenant, "po-4711").await.unwrap().unwrap();
    assert_eq!(record.status, IdempotencyStatus::Succeeded);
});

db_test!(test_concurrent_duplicate_receipts_create_one, |db| {
    let s = Services::new(&db);
    let request = ReceiptBuilder::new().staging(LocationId::new()).line(ItemId::new(), qty(2)).build();

    let (a, b) = tokio::join!(
        s.receiving.create_receipt(s.tenant, request.clone(), Some("race".into())),
        s.receiving.create_receipt(s.tenant, request.clone(), Some("race".into())),
    );

    let created: Vec<_> = [&a, &b].into_iter().filter_map(|r| r.as_ref().ok()).collect();
    assert!(!created.is_empty());
    assert!(created.iter().all(|r| r.id == created[0].id));
    for result in [&a, &b] {
        if let Err(err) = result {
            assert_eq!(err.code(), "IDEMPOTENCY_IN_PROGRESS");
        }
    }
});

db_test!(test_concurrent_postings_on_one_key_serialize, |db| {
    let s = Services::new(&db);
    let key = KeyFixtures::fresh();

    let mut drafts = Vec::new();
    for _ in 0..5 {
        let draft = s
            .adjustments
            .create_adjustment(s.tenant, AdjustmentBuilder::new().line(&key, qty(2)).build())
            .await
            .unwrap();
        drafts.push(draft.id);
    }

    let post = |i: usize| s.adjustments.post_adjustment(s.tenant, drafts[i]);
    let (a, b, c, d, e) = tokio::join!(post(0), post(1), post(2), post(3), post(4));
    for result in [a, b, c, d, e] {
        result.unwrap();
    }

    assert_balance(s.store.as_ref(), s.tenant, &key, qty(10), qty(0)).await;
    assert_reconciled(s.store.as_ref(), s.tenant).await;
});

db_test!(test_reservation_lifecycle_keeps_snapshot_reserved, |db| {
    let s = Services::new(&db);
    let key = KeyFixtures::fresh();
    let stock = s
        .adjustments
        .create_adjustment(s.tenant, AdjustmentBuilder::new().line(&key, qty(10)).build())
        .await
        .unwrap();
    s.adjustments.post_adjustment(s.tenant, stock.id).await.unwrap();

    let reservation = s
        .reservations
        .create_reservation(
            s.tenant,
            ReservationBuilder::new()
                .key(&key)
                .quantity(qty(4))
                .expires_at(s.clock.now() + chrono::Duration::minutes(10))
                .build(),
        )
        .await
        .unwrap();
    assert_balance(s.store.as_ref(), s.tenant, &key, qty(10), qty(4)).await;

    s.clock.advance(chrono::Duration::minutes(11));
    assert_eq!(s.reservations.expire_reservations(10).await.unwrap(), 1);

    let expired = s.reservations.get_reservation(s.tenant, reservation.id).await.unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);
    assert_balance(s.store.as_ref(), s.tenant, &key, qty(10), qty(0)).await;
    assert_reconciled(s.store.as_ref(), s.tenant).await;
});

db_test!(test_reconciler_repairs_manual_drift, |db| {
    let s = Services::new(&db);
    let key = KeyFixtures::fresh();
    let stock = s
        .adjustments
        .create_adjustment(s.tenant, AdjustmentBuilder::new().line(&key, qty(10)).build())
        .await
        .unwrap();
    s.adjustments.post_adjustment(s.tenant, stock.id).await.unwrap();

    sqlx::query("UPDATE balance_snapshot SET on_hand = 7 WHERE tenant_id = $1")
        .bind(*s.tenant.as_uuid())
        .execute(db.pool())
        .await
        .unwrap();

    let mismatches = s.reconciler.compare_balances(s.tenant, default_tolerance()).await.unwrap();
    assert_eq!(mismatches.len(), 1);

    let strict = ReconcileOptions {
        mode: ReconcileMode::Strict,
        ..ReconcileOptions::default()
    };
    assert_error_code(s.reconciler.reconcile(s.tenant, &strict).await, "RECONCILIATION_FAILED");

    let repair = ReconcileOptions {
        mode: ReconcileMode::Repair,
        ..ReconcileOptions::default()
    };
    let report = s.reconciler.reconcile(s.tenant, &repair).await.unwrap();
    assert_eq!(report.mismatch_count, 1);
    assert_eq!(report.remaining_count, 0);

    let audit: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM balance_repairs WHERE tenant_id = $1")
        .bind(*s.tenant.as_uuid())
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(audit, 1);
    assert_balance(s.store.as_ref(), s.tenant, &key, qty(10), qty(0)).await;
});

db_test!(test_clear_data_empties_every_table, |db| {
    let s = Services::new(&db);
    let draft = s
        .adjustments
        .create_adjustment(s.tenant, AdjustmentBuilder::new().line(&KeyFixtures::fresh(), qty(1)).build())
        .await
        .unwrap();
    s.adjustments.post_adjustment(s.tenant, draft.id).await.unwrap();

    db.clear_data().await.unwrap();

    assert!(s.store.list_tenants().await.unwrap().is_empty());
});
