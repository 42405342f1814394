//! Inventory Domain Ports
//!
//! The ledger talks to its relational store through two traits:
//!
//! - `InventoryStore`: the ambient connection. It opens units of work and
//!   serves the read-mostly aggregate queries used by reconciliation, plus
//!   the single-statement idempotency writes.
//! - `InventoryTx`: a unit of work. Every posting runs inside one, takes
//!   its row locks through it and either commits all of its writes or, when
//!   dropped without `commit`, none of them.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut tx = store.begin().await?;
//! let mut adjustment = tx
//!     .lock_adjustment(tenant_id, id)
//!     .await?
//!     .ok_or_else(|| InventoryError::not_found("Adjustment", id))?;
//! post_document(&mut tx, &mut adjustment, now).await?;
//! tx.update_adjustment(&adjustment).await?;
//! tx.commit().await?;
//! ```
//!
//! Services never call `InventoryStore` methods while they hold an open
//! `InventoryTx`; a store is free to serialize the two.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use core_kernel::{
    AdjustmentId, CountId, DomainPort, HealthCheckable, MovementId, PortError, PutawayId, Quantity,
    ReceiptId, ReceiptLineId, ReservationId, TenantId,
};

use crate::adjustment::Adjustment;
use crate::availability::PutawayTotals;
use crate::balance::{BalanceDelta, BalanceKey, BalanceSnapshot};
use crate::count::InventoryCount;
use crate::idempotency::{IdempotencyRecord, IdempotencyStatus, ResponseRef};
use crate::movement::Movement;
use crate::putaway::Putaway;
use crate::qc::{QcEvent, QcTotals};
use crate::receipt::{Receipt, ReceiptLineContext};
use crate::reconciliation::{BalanceRepair, LedgerTotal, ReservationTotal};
use crate::reservation::Reservation;

/// A transactional unit of work against the inventory store
#[async_trait]
pub trait InventoryTx: Send {
    // ---- ledger -------------------------------------------------------

    /// Appends a movement header and its lines
    async fn insert_movement(&mut self, movement: &Movement) -> Result<(), PortError>;

    /// Adds a delta to a snapshot row, creating it at zero if absent
    ///
    /// The row stays locked until the unit of work ends. Returns the row as
    /// it stands after the delta; the caller decides whether it is valid.
    async fn apply_balance_delta(
        &mut self,
        tenant_id: TenantId,
        key: &BalanceKey,
        delta: BalanceDelta,
        now: DateTime<Utc>,
    ) -> Result<BalanceSnapshot, PortError>;

    /// Ledger-derived on-hand for one key
    async fn ledger_on_hand(&mut self, tenant_id: TenantId, key: &BalanceKey) -> Result<Quantity, PortError>;

    // ---- adjustments ----------------------------------------------------

    async fn insert_adjustment(&mut self, adjustment: &Adjustment) -> Result<(), PortError>;

    /// Loads an adjustment and holds a row lock on it
    async fn lock_adjustment(&mut self, tenant_id: TenantId, id: AdjustmentId) -> Result<Option<Adjustment>, PortError>;

    async fn update_adjustment(&mut self, adjustment: &Adjustment) -> Result<(), PortError>;

    // ---- counts ---------------------------------------------------------

    async fn insert_count(&mut self, count: &InventoryCount) -> Result<(), PortError>;

    async fn lock_count(&mut self, tenant_id: TenantId, id: CountId) -> Result<Option<InventoryCount>, PortError>;

    async fn update_count(&mut self, count: &InventoryCount) -> Result<(), PortError>;

    // ---- receipts and QC ------------------------------------------------

    async fn insert_receipt(&mut self, receipt: &Receipt) -> Result<(), PortError>;

    async fn lock_receipt(&mut self, tenant_id: TenantId, id: ReceiptId) -> Result<Option<Receipt>, PortError>;

    async fn update_receipt(&mut self, receipt: &Receipt) -> Result<(), PortError>;

    /// Loads a receipt line with its header facts and locks the line
    async fn lock_receipt_line(
        &mut self,
        tenant_id: TenantId,
        id: ReceiptLineId,
    ) -> Result<Option<ReceiptLineContext>, PortError>;

    async fn qc_totals(&mut self, tenant_id: TenantId, receipt_line_id: ReceiptLineId) -> Result<QcTotals, PortError>;

    async fn insert_qc_event(&mut self, event: &QcEvent) -> Result<(), PortError>;

    // ---- putaways -------------------------------------------------------

    /// Posted and pending putaway quantity against a receipt line
    async fn putaway_totals(
        &mut self,
        tenant_id: TenantId,
        receipt_line_id: ReceiptLineId,
    ) -> Result<PutawayTotals, PortError>;

    /// Number of pending or completed putaway lines drawing on a receipt
    async fn count_active_putaway_lines(&mut self, tenant_id: TenantId, receipt_id: ReceiptId) -> Result<u64, PortError>;

    async fn insert_putaway(&mut self, putaway: &Putaway) -> Result<(), PortError>;

    /// Loads a putaway and locks it together with its lines
    async fn lock_putaway(&mut self, tenant_id: TenantId, id: PutawayId) -> Result<Option<Putaway>, PortError>;

    async fn update_putaway(&mut self, putaway: &Putaway) -> Result<(), PortError>;

    // ---- reservations ---------------------------------------------------

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), PortError>;

    async fn lock_reservation(
        &mut self,
        tenant_id: TenantId,
        id: ReservationId,
    ) -> Result<Option<Reservation>, PortError>;

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), PortError>;

    /// Makes every write of this unit of work durable
    async fn commit(self) -> Result<(), PortError>;
}

/// The inventory store
#[async_trait]
pub trait InventoryStore: DomainPort + HealthCheckable {
    type Tx: InventoryTx;

    /// Opens a unit of work
    async fn begin(&self) -> Result<Self::Tx, PortError>;

    // ---- reconciliation aggregates ----------------------------------------

    /// Signed movement-line deltas grouped by key
    async fn ledger_totals(&self, tenant_id: TenantId) -> Result<Vec<LedgerTotal>, PortError>;

    /// Open reservation quantity grouped by key
    async fn reservation_totals(&self, tenant_id: TenantId) -> Result<Vec<ReservationTotal>, PortError>;

    async fn balance_snapshots(&self, tenant_id: TenantId) -> Result<Vec<BalanceSnapshot>, PortError>;

    async fn balance_snapshot(&self, tenant_id: TenantId, key: &BalanceKey) -> Result<Option<BalanceSnapshot>, PortError>;

    /// Overwrites a snapshot row and records the audit row atomically
    async fn repair_balance(&self, snapshot: &BalanceSnapshot, repair: &BalanceRepair) -> Result<(), PortError>;

    /// Every tenant with ledger, reservation or snapshot rows
    async fn list_tenants(&self) -> Result<Vec<TenantId>, PortError>;

    // ---- reads --------------------------------------------------------------

    async fn find_movement(&self, tenant_id: TenantId, id: MovementId) -> Result<Option<Movement>, PortError>;

    async fn find_adjustment(&self, tenant_id: TenantId, id: AdjustmentId) -> Result<Option<Adjustment>, PortError>;

    async fn find_count(&self, tenant_id: TenantId, id: CountId) -> Result<Option<InventoryCount>, PortError>;

    async fn find_receipt(&self, tenant_id: TenantId, id: ReceiptId) -> Result<Option<Receipt>, PortError>;

    /// The receipt a keyed create stored, whatever its idempotency record says
    async fn find_receipt_by_idempotency_key(&self, tenant_id: TenantId, key: &str) -> Result<Option<Receipt>, PortError>;

    async fn find_receipt_line(
        &self,
        tenant_id: TenantId,
        id: ReceiptLineId,
    ) -> Result<Option<ReceiptLineContext>, PortError>;

    async fn find_putaway(&self, tenant_id: TenantId, id: PutawayId) -> Result<Option<Putaway>, PortError>;

    async fn find_reservation(&self, tenant_id: TenantId, id: ReservationId) -> Result<Option<Reservation>, PortError>;

    async fn receipt_line_qc_totals(&self, tenant_id: TenantId, id: ReceiptLineId) -> Result<QcTotals, PortError>;

    async fn receipt_line_putaway_totals(&self, tenant_id: TenantId, id: ReceiptLineId) -> Result<PutawayTotals, PortError>;

    /// Open reservations whose expiry is at or before `now`, oldest first
    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(TenantId, ReservationId)>, PortError>;

    // ---- idempotency ------------------------------------------------------

    /// Inserts the record unless (tenant, key) exists; true when inserted
    async fn insert_idempotency(&self, record: &IdempotencyRecord) -> Result<bool, PortError>;

    async fn find_idempotency(&self, tenant_id: TenantId, key: &str) -> Result<Option<IdempotencyRecord>, PortError>;

    /// Moves a FAILED record with a matching hash back to IN_PROGRESS
    ///
    /// True when this call won the reclaim.
    async fn reclaim_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
        request_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PortError>;

    /// Moves an IN_PROGRESS record to a terminal status; false if it was not IN_PROGRESS
    async fn complete_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
        status: IdempotencyStatus,
        response_ref: Option<&ResponseRef>,
        now: DateTime<Utc>,
    ) -> Result<bool, PortError>;

    /// Marks IN_PROGRESS records last touched before `stale_before` as FAILED
    async fn expire_idempotency(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, PortError>;
}
