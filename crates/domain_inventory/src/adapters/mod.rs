//! Adapters for the inventory ports
//!
//! The PostgreSQL adapter lives in `infra_db`. This module carries the
//! in-memory store used by service tests and local tooling.
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_inventory::adapters::InMemoryInventoryStore;
//! use domain_inventory::services::AdjustmentService;
//! use core_kernel::SystemClock;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryInventoryStore::new());
//! let adjustments = AdjustmentService::new(store, Arc::new(SystemClock));
//! ```

pub mod memory;

pub use memory::{InMemoryInventoryStore, InMemoryTx};
