//! Inventory Ledger Domain
//!
//! This crate is the balance-consistency core of the inventory system:
//! every change in stock is an append-only movement, and every derived
//! number (snapshot balances, putaway availability) can be recomputed from
//! the ledger.
//!
//! # Components
//!
//! - **Movement ledger** (`movement`, `services::ledger`): posts draft
//!   documents (adjustments, counts, putaways, receipts) as immutable
//!   movements, exactly once per document.
//! - **Availability calculator** (`availability`): pure function of QC and
//!   putaway totals deciding how much received stock may leave staging.
//! - **Balance reconciler** (`reconciliation`, `services::reconciler`):
//!   compares the snapshot projection to ledger truth and repairs drift.
//! - **Idempotency coordinator** (`idempotency`, `services::idempotency`):
//!   at most one effect per external request key.
//!
//! # Storage
//!
//! Services talk to storage through the `InventoryStore` / `InventoryTx`
//! ports. `adapters::InMemoryInventoryStore` implements them in memory; the
//! PostgreSQL adapter lives in `infra_db`.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_inventory::adapters::InMemoryInventoryStore;
//! use domain_inventory::services::{AdjustmentService, BalanceReconciler};
//! use domain_inventory::reconciliation::default_tolerance;
//! use core_kernel::SystemClock;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryInventoryStore::new());
//! let clock = Arc::new(SystemClock);
//! let adjustments = AdjustmentService::new(store.clone(), clock.clone());
//! let reconciler = BalanceReconciler::new(store, clock);
//!
//! let draft = adjustments.create_adjustment(tenant_id, request).await?;
//! adjustments.post_adjustment(tenant_id, draft.id).await?;
//! assert!(reconciler.compare_balances(tenant_id, default_tolerance()).await?.is_empty());
//! ```

pub mod error;
pub mod balance;
pub mod movement;
pub mod document;
pub mod adjustment;
pub mod count;
pub mod availability;
pub mod qc;
pub mod receipt;
pub mod putaway;
pub mod reservation;
pub mod reconciliation;
pub mod idempotency;
pub mod ports;
pub mod adapters;
pub mod services;

pub use error::{ErrorKind, InventoryError, InventoryResult};
pub use balance::{BalanceDelta, BalanceKey, BalanceSnapshot};
pub use movement::{
    DocumentKind, DocumentRef, Movement, MovementDraft, MovementLine, MovementStatus, MovementType,
};
pub use document::{DocumentStatus, PostableDocument};
pub use adjustment::{Adjustment, AdjustmentLine, NewAdjustment, NewAdjustmentLine};
pub use count::{CountLine, InventoryCount, NewCount, NewCountLine};
pub use availability::{availability, Availability, AvailabilityContext, BlockedReason, PutawayTotals};
pub use qc::{NewQcEvent, QcEvent, QcEventType, QcTotals};
pub use receipt::{NewReceipt, NewReceiptLine, Receipt, ReceiptLine, ReceiptLineContext, ReceiptStatus};
pub use putaway::{NewPutaway, NewPutawayLine, Putaway, PutawayLine, PutawayLineStatus};
pub use reservation::{NewReservation, Reservation, ReservationStatus};
pub use reconciliation::{
    BalanceMismatch, BalanceRepair, MismatchSource, ReconcileMode, ReconcileOptions, ReconciliationReport,
    RepairOptions, RepairOutcome,
};
pub use idempotency::{IdempotencyBegin, IdempotencyRecord, IdempotencyStatus, ResponseRef};
pub use ports::{InventoryStore, InventoryTx};
pub use adapters::InMemoryInventoryStore;
pub use services::{
    AdjustmentService, BalanceReconciler, CountService, IdempotencyCoordinator, Posted, PutawayService,
    ReceivingService, ReservationService,
};
