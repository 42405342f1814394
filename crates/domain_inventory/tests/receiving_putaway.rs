//! Receipts, QC events and putaways

mod common;

use common::{qty, Harness};
use core_kernel::{ItemId, LocationId, Quantity};
use domain_inventory::{
    BalanceKey, BlockedReason, DocumentStatus, InventoryError, MovementType, NewPutaway, NewPutawayLine,
    NewQcEvent, PutawayLineStatus, QcEventType, Receipt, ReceiptStatus,
};

fn qc(receipt: &Receipt, event_type: QcEventType, quantity: i64) -> NewQcEvent {
    NewQcEvent {
        receipt_line_id: receipt.lines[0].id,
        event_type,
        quantity: qty(quantity),
        actor: Some("inspector".into()),
        notes: None,
        occurred_at: None,
    }
}

fn putaway(receipt: &Receipt, to: LocationId, quantity: i64) -> NewPutaway {
    NewPutaway {
        receipt_id: Some(receipt.id),
        notes: None,
        lines: vec![NewPutawayLine {
            receipt_line_id: receipt.lines[0].id,
            from_location_id: None,
            to_location_id: to,
            uom: "ea".into(),
            quantity: qty(quantity),
        }],
    }
}

#[tokio::test]
async fn test_receipt_posts_into_staging() {
    let h = Harness::new();
    let staging = LocationId::new();
    let item = ItemId::new();

    let receipt = h.receive(staging, item, 50).await;
    assert_eq!(receipt.status, ReceiptStatus::Posted);
    assert!(receipt.movement_id.is_some());

    let movements = h.store.movements(h.tenant).await;
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::ReceiptDerived);
    assert_eq!(h.on_hand(&BalanceKey::new(item, staging, "ea")).await, qty(50));
}

#[tokio::test]
async fn test_qc_hold_blocks_until_accepted() {
    let h = Harness::new();
    let receipt = h.receive(LocationId::new(), ItemId::new(), 50).await;
    let line_id = receipt.lines[0].id;

    h.receiving.record_qc_event(h.tenant, qc(&receipt, QcEventType::Hold, 20)).await.unwrap();
    let held = h.receiving.receipt_line_availability(h.tenant, line_id).await.unwrap();
    assert_eq!(held.available_for_planning, Quantity::zero());
    assert_eq!(held.blocked_reason, Some(BlockedReason::QcHoldUnresolved));
    assert_eq!(held.blocked_reason.map(|r| r.to_string()).as_deref(), Some("QC hold unresolved"));

    let err = h
        .putaways
        .create_putaway(h.tenant, putaway(&receipt, LocationId::new(), 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QC_BLOCKED");

    h.receiving.record_qc_event(h.tenant, qc(&receipt, QcEventType::Accept, 20)).await.unwrap();
    let accepted = h.receiving.receipt_line_availability(h.tenant, line_id).await.unwrap();
    assert_eq!(accepted.available_for_planning, qty(20));
    assert!(accepted.blocked_reason.is_none());
}

#[tokio::test]
async fn test_qc_events_cannot_exceed_received() {
    let h = Harness::new();
    let receipt = h.receive(LocationId::new(), ItemId::new(), 10).await;

    h.receiving.record_qc_event(h.tenant, qc(&receipt, QcEventType::Hold, 6)).await.unwrap();
    let err = h
        .receiving
        .record_qc_event(h.tenant, qc(&receipt, QcEventType::Reject, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::QuantityExceeded { available, .. } if available == qty(4)));
    assert_eq!(h.store.qc_events(h.tenant).await.len(), 1);
}

#[tokio::test]
async fn test_second_putaway_rejected_when_pending_covers_line() {
    let h = Harness::new();
    let receipt = h.receive(LocationId::new(), ItemId::new(), 20).await;

    let first = h
        .putaways
        .create_putaway(h.tenant, putaway(&receipt, LocationId::new(), 20))
        .await
        .unwrap();
    assert_eq!(first.lines[0].status, PutawayLineStatus::Pending);

    let err = h
        .putaways
        .create_putaway(h.tenant, putaway(&receipt, LocationId::new(), 5))
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::QuantityExceeded { available, .. } if available.is_zero()));
}

#[tokio::test]
async fn test_concurrent_putaways_never_overcommit() {
    let h = Harness::new();
    let receipt = h.receive(LocationId::new(), ItemId::new(), 20).await;

    let (a, b) = tokio::join!(
        h.putaways.create_putaway(h.tenant, putaway(&receipt, LocationId::new(), 20)),
        h.putaways.create_putaway(h.tenant, putaway(&receipt, LocationId::new(), 5)),
    );
    let planned: Quantity = [a.as_ref().ok(), b.as_ref().ok()]
        .into_iter()
        .flatten()
        .flat_map(|p| p.lines.iter().map(|l| l.quantity))
        .sum();
    assert!(a.is_err() || b.is_err());
    assert!(!planned.exceeds(qty(20)));
}

#[tokio::test]
async fn test_requests_for_one_line_are_summed() {
    let h = Harness::new();
    let receipt = h.receive(LocationId::new(), ItemId::new(), 10).await;
    let mut request = putaway(&receipt, LocationId::new(), 6);
    let mut extra = request.lines[0].clone();
    extra.to_location_id = LocationId::new();
    request.lines.push(extra);

    let err = h.putaways.create_putaway(h.tenant, request).await.unwrap_err();
    assert_eq!(err.code(), "QUANTITY_EXCEEDED");
}

#[tokio::test]
async fn test_putaway_line_shape_checks() {
    let h = Harness::new();
    let staging = LocationId::new();
    let receipt = h.receive(staging, ItemId::new(), 10).await;

    let same = putaway(&receipt, staging, 1);
    assert_eq!(h.putaways.create_putaway(h.tenant, same).await.unwrap_err().code(), "SAME_LOCATION");

    let mut wrong_uom = putaway(&receipt, LocationId::new(), 1);
    wrong_uom.lines[0].uom = "box".into();
    assert_eq!(h.putaways.create_putaway(h.tenant, wrong_uom).await.unwrap_err().code(), "UOM_MISMATCH");
}

#[tokio::test]
async fn test_posting_putaway_transfers_out_of_staging() {
    let h = Harness::new();
    let staging = LocationId::new();
    let destination = LocationId::new();
    let item = ItemId::new();
    let receipt = h.receive(staging, item, 20).await;

    let planned = h
        .putaways
        .create_putaway(h.tenant, putaway(&receipt, destination, 15))
        .await
        .unwrap();
    let posted = h.putaways.post_putaway(h.tenant, planned.id).await.unwrap();

    assert_eq!(posted.document.status, DocumentStatus::Posted);
    assert_eq!(posted.document.lines[0].status, PutawayLineStatus::Completed);
    assert_eq!(posted.movement.movement_type, MovementType::Transfer);
    assert_eq!(posted.movement.lines.len(), 2);
    assert_eq!(h.on_hand(&BalanceKey::new(item, staging, "ea")).await, qty(5));
    assert_eq!(h.on_hand(&BalanceKey::new(item, destination, "ea")).await, qty(15));

    let err = h.putaways.post_putaway(h.tenant, planned.id).await.unwrap_err();
    assert_eq!(err.code(), "ALREADY_POSTED");

    let remaining = h
        .receiving
        .receipt_line_availability(h.tenant, receipt.lines[0].id)
        .await
        .unwrap();
    assert_eq!(remaining.remaining_after_posted, qty(5));
    assert_eq!(remaining.available_for_planning, qty(5));
}

#[tokio::test]
async fn test_posting_rechecks_availability_after_qc_reject() {
    let h = Harness::new();
    let receipt = h.receive(LocationId::new(), ItemId::new(), 20).await;

    let first = h
        .putaways
        .create_putaway(h.tenant, putaway(&receipt, LocationId::new(), 10))
        .await
        .unwrap();
    let second = h
        .putaways
        .create_putaway(h.tenant, putaway(&receipt, LocationId::new(), 10))
        .await
        .unwrap();

    // Rejecting 5 leaves 15 usable, 10 of which the second putaway still holds.
    h.receiving.record_qc_event(h.tenant, qc(&receipt, QcEventType::Reject, 5)).await.unwrap();

    let err = h.putaways.post_putaway(h.tenant, first.id).await.unwrap_err();
    assert!(matches!(err, InventoryError::QuantityExceeded { available, .. } if available == qty(5)));

    h.putaways.cancel_putaway(h.tenant, second.id).await.unwrap();
    h.putaways.post_putaway(h.tenant, first.id).await.unwrap();
}

#[tokio::test]
async fn test_void_rules() {
    let h = Harness::new();
    let staging = LocationId::new();
    let item = ItemId::new();
    let receipt = h.receive(staging, item, 8).await;

    let planned = h
        .putaways
        .create_putaway(h.tenant, putaway(&receipt, LocationId::new(), 3))
        .await
        .unwrap();
    let err = h.receiving.void_receipt(h.tenant, receipt.id, None).await.unwrap_err();
    assert_eq!(err.code(), "NOT_ELIGIBLE");

    let canceled = h.putaways.cancel_putaway(h.tenant, planned.id).await.unwrap();
    assert_eq!(canceled.lines[0].status, PutawayLineStatus::Canceled);

    let voided = h
        .receiving
        .void_receipt(h.tenant, receipt.id, Some("wrong PO".into()))
        .await
        .unwrap();
    assert_eq!(voided.status, ReceiptStatus::Voided);
    assert!(voided.void_movement_id.is_some());
    assert_eq!(h.on_hand(&BalanceKey::new(item, staging, "ea")).await, Quantity::zero());

    let again = h.receiving.void_receipt(h.tenant, receipt.id, None).await.unwrap_err();
    assert_eq!(again.code(), "CANCELED");

    let qc_err = h
        .receiving
        .record_qc_event(h.tenant, qc(&receipt, QcEventType::Accept, 1))
        .await
        .unwrap_err();
    assert_eq!(qc_err.code(), "NOT_ELIGIBLE");
}

#[tokio::test]
async fn test_completed_putaway_blocks_void() {
    let h = Harness::new();
    let receipt = h.receive(LocationId::new(), ItemId::new(), 4).await;
    let planned = h
        .putaways
        .create_putaway(h.tenant, putaway(&receipt, LocationId::new(), 4))
        .await
        .unwrap();
    h.putaways.post_putaway(h.tenant, planned.id).await.unwrap();

    let err = h.receiving.void_receipt(h.tenant, receipt.id, None).await.unwrap_err();
    assert_eq!(err.code(), "NOT_ELIGIBLE");
}
