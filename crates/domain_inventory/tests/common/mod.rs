//! Shared harness for service-level tests

#![allow(dead_code)]

use chrono::Utc;
use std::sync::Arc;

use core_kernel::{Clock, FixedClock, ItemId, LocationId, Quantity, TenantId};
use domain_inventory::{
    AdjustmentService, BalanceKey, BalanceReconciler, BalanceSnapshot, CountService, InMemoryInventoryStore,
    InventoryStore, NewAdjustment, NewAdjustmentLine, NewReceipt, NewReceiptLine, PutawayService, Receipt,
    ReceivingService, ReservationService,
};

pub fn qty(value: i64) -> Quantity {
    Quantity::from_i64(value)
}

pub fn key() -> BalanceKey {
    BalanceKey::new(ItemId::new(), LocationId::new(), "ea")
}

pub struct Harness {
    pub store: Arc<InMemoryInventoryStore>,
    pub clock: FixedClock,
    pub tenant: TenantId,
    pub adjustments: AdjustmentService<InMemoryInventoryStore>,
    pub counts: CountService<InMemoryInventoryStore>,
    pub receiving: ReceivingService<InMemoryInventoryStore>,
    pub putaways: PutawayService<InMemoryInventoryStore>,
    pub reservations: ReservationService<InMemoryInventoryStore>,
    pub reconciler: BalanceReconciler<InMemoryInventoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryInventoryStore::new());
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

    /// Posts an adjustment of `quantity` at `key`
    pub async fn adjust(&self, key: &BalanceKey, quantity: i64) {
        let request = NewAdjustment {
            occurred_at: None,
            reason: Some("test".into()),
            notes: None,
            external_ref: None,
            lines: vec![NewAdjustmentLine {
                item_id: key.item_id,
                location_id: key.location_id,
                uom: key.uom.clone(),
                quantity_delta: qty(quantity),
                reason_code: None,
            }],
        };
        let draft = self.adjustments.create_adjustment(self.tenant, request).await.unwrap();
        self.adjustments.post_adjustment(self.tenant, draft.id).await.unwrap();
    }

    pub fn receipt_request(staging: LocationId, item_id: ItemId, quantity: i64) -> NewReceipt {
        NewReceipt {
            purchase_order_ref: Some("PO-1001".into()),
            staging_location_id: staging,
            received_at: None,
            lines: vec![NewReceiptLine {
                item_id,
                uom: "ea".into(),
                quantity_received: qty(quantity),
            }],
        }
    }

    /// Receives one line of `quantity` into `staging`
    pub async fn receive(&self, staging: LocationId, item_id: ItemId, quantity: i64) -> Receipt {
        self.receiving
            .create_receipt(self.tenant, Self::receipt_request(staging, item_id, quantity), None)
            .await
            .unwrap()
    }

    pub async fn snapshot(&self, key: &BalanceKey) -> Option<BalanceSnapshot> {
        self.store.balance_snapshot(self.tenant, key).await.unwrap()
    }

    pub async fn on_hand(&self, key: &BalanceKey) -> Quantity {
        self.snapshot(key).await.map_or_else(Quantity::zero, |s| s.on_hand)
    }
}
