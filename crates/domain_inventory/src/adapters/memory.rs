//! In-memory inventory store
//!
//! Implements `InventoryStore` over a single mutex-guarded state. A unit of
//! work holds the mutex for its whole lifetime and edits a private copy of
//! the state; `commit` swaps the copy in, dropping the unit of work throws
//! it away. That gives the same all-or-nothing and serialization guarantees
//! the Postgres adapter gets from transactions and row locks, which makes it
//! suitable for service tests and local tooling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use core_kernel::{
    AdapterHealth, AdjustmentId, CountId, DomainPort, HealthCheckResult, HealthCheckable, MovementId,
    PortError, PutawayId, Quantity, ReceiptId, ReceiptLineId, ReservationId, TenantId,
};

use crate::adjustment::Adjustment;
use crate::availability::PutawayTotals;
use crate::balance::{BalanceDelta, BalanceKey, BalanceSnapshot};
use crate::count::InventoryCount;
use crate::document::DocumentStatus;
use crate::idempotency::{IdempotencyRecord, IdempotencyStatus, ResponseRef};
use crate::movement::Movement;
use crate::ports::{InventoryStore, InventoryTx};
use crate::putaway::{Putaway, PutawayLineStatus};
use crate::qc::{QcEvent, QcTotals};
use crate::receipt::{Receipt, ReceiptLineContext};
use crate::reconciliation::{BalanceRepair, LedgerTotal, ReservationTotal};
use crate::reservation::Reservation;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    movements: Vec<Movement>,
    snapshots: BTreeMap<(TenantId, BalanceKey), BalanceSnapshot>,
    repairs: Vec<BalanceRepair>,
    adjustments: HashMap<AdjustmentId, Adjustment>,
    counts: HashMap<CountId, InventoryCount>,
    receipts: HashMap<ReceiptId, Receipt>,
    qc_events: Vec<QcEvent>,
    putaways: HashMap<PutawayId, Putaway>,
    reservations: HashMap<ReservationId, Reservation>,
    idempotency: HashMap<(TenantId, String), IdempotencyRecord>,
}

impl MemoryState {
    fn ledger_on_hand(&self, tenant_id: TenantId, key: &BalanceKey) -> Quantity {
        self.movements
            .iter()
            .filter(|movement| movement.tenant_id == tenant_id)
            .flat_map(|movement| movement.lines.iter())
            .filter(|line| line.item_id == key.item_id && line.location_id == key.location_id && line.uom == key.uom)
            .map(|line| line.quantity_delta)
            .sum()
    }

    fn ledger_totals(&self, tenant_id: TenantId) -> Vec<LedgerTotal> {
        let mut totals: BTreeMap<BalanceKey, Quantity> = BTreeMap::new();
        for movement in self.movements.iter().filter(|m| m.tenant_id == tenant_id) {
            for line in &movement.lines {
                *totals.entry(line.key()).or_default() += line.quantity_delta;
            }
        }
        totals
            .into_iter()
            .map(|(key, on_hand)| LedgerTotal { key, on_hand })
            .collect()
    }

    fn reservation_totals(&self, tenant_id: TenantId) -> Vec<ReservationTotal> {
        let mut totals: BTreeMap<BalanceKey, BalanceDelta> = BTreeMap::new();
        for reservation in self
            .reservations
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.status.is_open())
        {
            *totals.entry(reservation.key.clone()).or_default() += reservation.contribution();
        }
        totals
            .into_iter()
            .map(|(key, delta)| ReservationTotal {
                key,
                reserved: delta.reserved,
                allocated: delta.allocated,
            })
            .collect()
    }

    fn receipt_line(&self, tenant_id: TenantId, id: ReceiptLineId) -> Option<ReceiptLineContext> {
        self.receipts
            .values()
            .filter(|receipt| receipt.tenant_id == tenant_id)
            .find_map(|receipt| {
                receipt.lines.iter().find(|line| line.id == id).map(|line| ReceiptLineContext {
                    tenant_id,
                    receipt_id: receipt.id,
                    receipt_status: receipt.status,
                    staging_location_id: receipt.staging_location_id,
                    line: line.clone(),
                })
            })
    }

    fn qc_totals(&self, tenant_id: TenantId, receipt_line_id: ReceiptLineId) -> QcTotals {
        QcTotals::from_events(
            self.qc_events
                .iter()
                .filter(|event| event.tenant_id == tenant_id && event.receipt_line_id == receipt_line_id),
        )
    }

    fn putaway_totals(&self, tenant_id: TenantId, receipt_line_id: ReceiptLineId) -> PutawayTotals {
        let mut totals = PutawayTotals::default();
        for putaway in self.putaways.values().filter(|p| p.tenant_id == tenant_id) {
            for line in putaway.lines.iter().filter(|l| l.receipt_line_id == receipt_line_id) {
                match (putaway.status, line.status) {
                    (DocumentStatus::Posted, PutawayLineStatus::Completed) => totals.posted += line.quantity,
                    (DocumentStatus::Draft, PutawayLineStatus::Pending) => totals.pending += line.quantity,
                    _ => {}
                }
            }
        }
        totals
    }

    fn tenant_of_receipt_line(&self, tenant_id: TenantId, id: ReceiptLineId) -> bool {
        self.receipt_line(tenant_id, id).is_some()
    }
}

/// Inventory store backed by process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a snapshot row without touching the ledger, simulating drift
    pub async fn overwrite_balance(&self, snapshot: BalanceSnapshot) {
        let mut state = self.state.lock().await;
        state
            .snapshots
            .insert((snapshot.tenant_id, snapshot.key.clone()), snapshot);
    }

    /// Removes a snapshot row without touching the ledger
    pub async fn delete_balance(&self, tenant_id: TenantId, key: &BalanceKey) {
        let mut state = self.state.lock().await;
        state.snapshots.remove(&(tenant_id, key.clone()));
    }

    /// Every movement posted for a tenant, in posting order
    pub async fn movements(&self, tenant_id: TenantId) -> Vec<Movement> {
        let state = self.state.lock().await;
        state
            .movements
            .iter()
            .filter(|movement| movement.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub async fn receipts(&self, tenant_id: TenantId) -> Vec<Receipt> {
        let state = self.state.lock().await;
        state
            .receipts
            .values()
            .filter(|receipt| receipt.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Repair audit rows recorded for a tenant
    pub async fn repairs(&self, tenant_id: TenantId) -> Vec<BalanceRepair> {
        let state = self.state.lock().await;
        state
            .repairs
            .iter()
            .filter(|repair| repair.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub async fn qc_events(&self, tenant_id: TenantId) -> Vec<QcEvent> {
        let state = self.state.lock().await;
        state
            .qc_events
            .iter()
            .filter(|event| event.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

impl DomainPort for InMemoryInventoryStore {}

#[async_trait]
impl HealthCheckable for InMemoryInventoryStore {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult {
            adapter_id: "memory-inventory-store".to_string(),
            status: AdapterHealth::Healthy,
            latency_ms: 0,
            message: Some("In-memory store is always available".to_string()),
            checked_at: Utc::now(),
        }
    }
}

/// Unit of work over the in-memory store
pub struct InMemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl InventoryTx for InMemoryTx {
    async fn insert_movement(&mut self, movement: &Movement) -> Result<(), PortError> {
        if self.working.movements.iter().any(|m| m.id == movement.id) {
            return Err(PortError::conflict(format!("movement {} already exists", movement.id)));
        }
        self.working.movements.push(movement.clone());
        Ok(())
    }

    async fn apply_balance_delta(
        &mut self,
        tenant_id: TenantId,
        key: &BalanceKey,
        delta: BalanceDelta,
        now: DateTime<Utc>,
    ) -> Result<BalanceSnapshot, PortError> {
        let row = self
            .working
            .snapshots
            .entry((tenant_id, key.clone()))
            .or_insert_with(|| BalanceSnapshot::empty(tenant_id, key.clone(), now));
        row.on_hand += delta.on_hand;
        row.reserved += delta.reserved;
        row.allocated += delta.allocated;
        row.updated_at = now;
        Ok(row.clone())
    }

    async fn ledger_on_hand(&mut self, tenant_id: TenantId, key: &BalanceKey) -> Result<Quantity, PortError> {
        Ok(self.working.ledger_on_hand(tenant_id, key))
    }

    async fn insert_adjustment(&mut self, adjustment: &Adjustment) -> Result<(), PortError> {
        self.working.adjustments.insert(adjustment.id, adjustment.clone());
        Ok(())
    }

    async fn lock_adjustment(&mut self, tenant_id: TenantId, id: AdjustmentId) -> Result<Option<Adjustment>, PortError> {
        Ok(self
            .working
            .adjustments
            .get(&id)
            .filter(|adjustment| adjustment.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_adjustment(&mut self, adjustment: &Adjustment) -> Result<(), PortError> {
        match self.working.adjustments.get_mut(&adjustment.id) {
            Some(stored) => {
                *stored = adjustment.clone();
                Ok(())
            }
            None => Err(PortError::not_found("Adjustment", adjustment.id)),
        }
    }

    async fn insert_count(&mut self, count: &InventoryCount) -> Result<(), PortError> {
        self.working.counts.insert(count.id, count.clone());
        Ok(())
    }

    async fn lock_count(&mut self, tenant_id: TenantId, id: CountId) -> Result<Option<InventoryCount>, PortError> {
        Ok(self
            .working
            .counts
            .get(&id)
            .filter(|count| count.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_count(&mut self, count: &InventoryCount) -> Result<(), PortError> {
        match self.working.counts.get_mut(&count.id) {
            Some(stored) => {
                *stored = count.clone();
                Ok(())
            }
            None => Err(PortError::not_found("Count", count.id)),
        }
    }

    async fn insert_receipt(&mut self, receipt: &Receipt) -> Result<(), PortError> {
        if let Some(key) = &receipt.idempotency_key {
            let taken = self.working.receipts.values().any(|existing| {
                existing.tenant_id == receipt.tenant_id && existing.idempotency_key.as_ref() == Some(key)
            });
            if taken {
                return Err(PortError::conflict(format!("a receipt already uses idempotency key '{}'", key)));
            }
        }
        self.working.receipts.insert(receipt.id, receipt.clone());
        Ok(())
    }

    async fn lock_receipt(&mut self, tenant_id: TenantId, id: ReceiptId) -> Result<Option<Receipt>, PortError> {
        Ok(self
            .working
            .receipts
            .get(&id)
            .filter(|receipt| receipt.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_receipt(&mut self, receipt: &Receipt) -> Result<(), PortError> {
        match self.working.receipts.get_mut(&receipt.id) {
            Some(stored) => {
                *stored = receipt.clone();
                Ok(())
            }
            None => Err(PortError::not_found("Receipt", receipt.id)),
        }
    }

    async fn lock_receipt_line(
        &mut self,
        tenant_id: TenantId,
        id: ReceiptLineId,
    ) -> Result<Option<ReceiptLineContext>, PortError> {
        Ok(self.working.receipt_line(tenant_id, id))
    }

    async fn qc_totals(&mut self, tenant_id: TenantId, receipt_line_id: ReceiptLineId) -> Result<QcTotals, PortError> {
        Ok(self.working.qc_totals(tenant_id, receipt_line_id))
    }

    async fn insert_qc_event(&mut self, event: &QcEvent) -> Result<(), PortError> {
        if !self.working.tenant_of_receipt_line(event.tenant_id, event.receipt_line_id) {
            return Err(PortError::invalid_reference(format!(
                "receipt line {} does not exist",
                event.receipt_line_id
            )));
        }
        self.working.qc_events.push(event.clone());
        Ok(())
    }

    async fn putaway_totals(
        &mut self,
        tenant_id: TenantId,
        receipt_line_id: ReceiptLineId,
    ) -> Result<PutawayTotals, PortError> {
        Ok(self.working.putaway_totals(tenant_id, receipt_line_id))
    }

    async fn count_active_putaway_lines(&mut self, tenant_id: TenantId, receipt_id: ReceiptId) -> Result<u64, PortError> {
        let line_ids: BTreeSet<ReceiptLineId> = match self.working.receipts.get(&receipt_id) {
            Some(receipt) if receipt.tenant_id == tenant_id => receipt.lines.iter().map(|l| l.id).collect(),
            _ => return Ok(0),
        };
        let count = self
            .working
            .putaways
            .values()
            .filter(|putaway| putaway.tenant_id == tenant_id)
            .flat_map(|putaway| putaway.lines.iter())
            .filter(|line| line.status != PutawayLineStatus::Canceled && line_ids.contains(&line.receipt_line_id))
            .count();
        Ok(count as u64)
    }

    async fn insert_putaway(&mut self, putaway: &Putaway) -> Result<(), PortError> {
        self.working.putaways.insert(putaway.id, putaway.clone());
        Ok(())
    }

    async fn lock_putaway(&mut self, tenant_id: TenantId, id: PutawayId) -> Result<Option<Putaway>, PortError> {
        Ok(self
            .working
            .putaways
            .get(&id)
            .filter(|putaway| putaway.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_putaway(&mut self, putaway: &Putaway) -> Result<(), PortError> {
        match self.working.putaways.get_mut(&putaway.id) {
            Some(stored) => {
                *stored = putaway.clone();
                Ok(())
            }
            None => Err(PortError::not_found("Putaway", putaway.id)),
        }
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), PortError> {
        self.working.reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn lock_reservation(
        &mut self,
        tenant_id: TenantId,
        id: ReservationId,
    ) -> Result<Option<Reservation>, PortError> {
        Ok(self
            .working
            .reservations
            .get(&id)
            .filter(|reservation| reservation.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), PortError> {
        match self.working.reservations.get_mut(&reservation.id) {
            Some(stored) => {
                *stored = reservation.clone();
                Ok(())
            }
            None => Err(PortError::not_found("Reservation", reservation.id)),
        }
    }

    async fn commit(self) -> Result<(), PortError> {
        let InMemoryTx { mut guard, working } = self;
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, PortError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTx { guard, working })
    }

    async fn ledger_totals(&self, tenant_id: TenantId) -> Result<Vec<LedgerTotal>, PortError> {
        Ok(self.state.lock().await.ledger_totals(tenant_id))
    }

    async fn reservation_totals(&self, tenant_id: TenantId) -> Result<Vec<ReservationTotal>, PortError> {
        Ok(self.state.lock().await.reservation_totals(tenant_id))
    }

    async fn balance_snapshots(&self, tenant_id: TenantId) -> Result<Vec<BalanceSnapshot>, PortError> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .values()
            .filter(|snapshot| snapshot.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn balance_snapshot(&self, tenant_id: TenantId, key: &BalanceKey) -> Result<Option<BalanceSnapshot>, PortError> {
        let state = self.state.lock().await;
        Ok(state.snapshots.get(&(tenant_id, key.clone())).cloned())
    }

    async fn repair_balance(&self, snapshot: &BalanceSnapshot, repair: &BalanceRepair) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        state
            .snapshots
            .insert((snapshot.tenant_id, snapshot.key.clone()), snapshot.clone());
        state.repairs.push(repair.clone());
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>, PortError> {
        let state = self.state.lock().await;
        let tenants: BTreeSet<TenantId> = state
            .movements
            .iter()
            .map(|m| m.tenant_id)
            .chain(state.reservations.values().map(|r| r.tenant_id))
            .chain(state.snapshots.keys().map(|(tenant_id, _)| *tenant_id))
            .collect();
        Ok(tenants.into_iter().collect())
    }

    async fn find_movement(&self, tenant_id: TenantId, id: MovementId) -> Result<Option<Movement>, PortError> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .find(|m| m.id == id && m.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_adjustment(&self, tenant_id: TenantId, id: AdjustmentId) -> Result<Option<Adjustment>, PortError> {
        let state = self.state.lock().await;
        Ok(state.adjustments.get(&id).filter(|a| a.tenant_id == tenant_id).cloned())
    }

    async fn find_count(&self, tenant_id: TenantId, id: CountId) -> Result<Option<InventoryCount>, PortError> {
        let state = self.state.lock().await;
        Ok(state.counts.get(&id).filter(|c| c.tenant_id == tenant_id).cloned())
    }

    async fn find_receipt(&self, tenant_id: TenantId, id: ReceiptId) -> Result<Option<Receipt>, PortError> {
        let state = self.state.lock().await;
        Ok(state.receipts.get(&id).filter(|r| r.tenant_id == tenant_id).cloned())
    }

    async fn find_receipt_by_idempotency_key(&self, tenant_id: TenantId, key: &str) -> Result<Option<Receipt>, PortError> {
        let state = self.state.lock().await;
        Ok(state
            .receipts
            .values()
            .find(|r| r.tenant_id == tenant_id && r.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_receipt_line(
        &self,
        tenant_id: TenantId,
        id: ReceiptLineId,
    ) -> Result<Option<ReceiptLineContext>, PortError> {
        Ok(self.state.lock().await.receipt_line(tenant_id, id))
    }

    async fn find_putaway(&self, tenant_id: TenantId, id: PutawayId) -> Result<Option<Putaway>, PortError> {
        let state = self.state.lock().await;
        Ok(state.putaways.get(&id).filter(|p| p.tenant_id == tenant_id).cloned())
    }

    async fn find_reservation(&self, tenant_id: TenantId, id: ReservationId) -> Result<Option<Reservation>, PortError> {
        let state = self.state.lock().await;
        Ok(state.reservations.get(&id).filter(|r| r.tenant_id == tenant_id).cloned())
    }

    async fn receipt_line_qc_totals(&self, tenant_id: TenantId, id: ReceiptLineId) -> Result<QcTotals, PortError> {
        Ok(self.state.lock().await.qc_totals(tenant_id, id))
    }

    async fn receipt_line_putaway_totals(&self, tenant_id: TenantId, id: ReceiptLineId) -> Result<PutawayTotals, PortError> {
        Ok(self.state.lock().await.putaway_totals(tenant_id, id))
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(TenantId, ReservationId)>, PortError> {
        let state = self.state.lock().await;
        let mut due: Vec<&Reservation> = state
            .reservations
            .values()
            .filter(|reservation| reservation.is_expired_at(now))
            .collect();
        due.sort_by_key(|reservation| reservation.expires_at);
        Ok(due
            .into_iter()
            .take(limit)
            .map(|reservation| (reservation.tenant_id, reservation.id))
            .collect())
    }

    async fn insert_idempotency(&self, record: &IdempotencyRecord) -> Result<bool, PortError> {
        let mut state = self.state.lock().await;
        let slot = (record.tenant_id, record.key.clone());
        if state.idempotency.contains_key(&slot) {
            return Ok(false);
        }
        state.idempotency.insert(slot, record.clone());
        Ok(true)
    }

    async fn find_idempotency(&self, tenant_id: TenantId, key: &str) -> Result<Option<IdempotencyRecord>, PortError> {
        let state = self.state.lock().await;
        Ok(state.idempotency.get(&(tenant_id, key.to_string())).cloned())
    }

    async fn reclaim_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
        request_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PortError> {
        let mut state = self.state.lock().await;
        match state.idempotency.get_mut(&(tenant_id, key.to_string())) {
            Some(record) if record.status == IdempotencyStatus::Failed && record.request_hash == request_hash => {
                record.status = IdempotencyStatus::InProgress;
                record.response_ref = None;
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
        status: IdempotencyStatus,
        response_ref: Option<&ResponseRef>,
        now: DateTime<Utc>,
    ) -> Result<bool, PortError> {
        let mut state = self.state.lock().await;
        match state.idempotency.get_mut(&(tenant_id, key.to_string())) {
            Some(record) if record.status == IdempotencyStatus::InProgress => {
                record.status = status;
                record.response_ref = response_ref.cloned();
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_idempotency(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, PortError> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for record in state.idempotency.values_mut() {
            if record.status == IdempotencyStatus::InProgress && record.updated_at < stale_before {
                record.status = IdempotencyStatus::Failed;
                record.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }
}
