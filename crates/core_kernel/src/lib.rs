//! Core Kernel - Foundational types shared by the inventory ledger crates
//!
//! This crate provides the building blocks every other component depends on:
//! - `Quantity`, a fixed-scale decimal with a single rounding rule
//! - Strongly typed identifiers for tenants, items, locations and documents
//! - The `Clock` port used for timestamps
//! - Port infrastructure (`PortError`, `DomainPort`, health checks)

pub mod quantity;
pub mod clock;
pub mod identifiers;
pub mod ports;
pub mod error;

pub use quantity::{Quantity, QuantityError, QUANTITY_SCALE};
pub use clock::{Clock, SystemClock, FixedClock};
pub use identifiers::{
    TenantId, ItemId, LocationId, MovementId, MovementLineId,
    AdjustmentId, AdjustmentLineId, CountId, CountLineId,
    ReceiptId, ReceiptLineId, QcEventId, PutawayId, PutawayLineId,
    ReservationId, ReconciliationRunId, BalanceRepairId,
};
pub use ports::{
    PortError, DomainPort, HealthCheckable, HealthCheckResult, AdapterHealth,
};
pub use error::CoreError;
