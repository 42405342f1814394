//! Inventory Worker
//!
//! Background process keeping derived inventory state honest:
//!
//! - **Reconciliation**: periodic sweep comparing balance snapshots to the
//!   movement ledger in `report`, `repair` or `strict` mode
//! - **Reservation expiry**: releases holds whose expiry time has passed
//! - **Idempotency cleanup**: fails request keys stuck in progress
//!
//! The same crate provides the `inventory-worker` binary, which also exposes
//! one-shot `reconcile` and `bootstrap` commands for operators.
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_worker::{build_scheduler, WorkerConfig};
//!
//! let mut scheduler = build_scheduler(store, clock, &WorkerConfig::from_env()?)?;
//! scheduler.start()?;
//! // ...
//! scheduler.shutdown().await;
//! ```

pub mod config;
pub mod telemetry;
pub mod scheduler;
pub mod jobs;

pub use config::{LogFormat, WorkerConfig};
pub use jobs::{build_scheduler, IdempotencyCleanupJob, ReconciliationJob, ReservationExpiryJob};
pub use scheduler::{JobOutcome, JobScheduler, JobStats, ScheduledJob, SchedulerError};
pub use telemetry::init_tracing;
