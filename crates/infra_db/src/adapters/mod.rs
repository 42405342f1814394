//! Port Adapters
//!
//! Connects the `domain_inventory` ports to the PostgreSQL repositories.
//!
//! # Usage
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresInventoryStore;
//! use domain_inventory::InventoryStore;
//!
//! let store = PostgresInventoryStore::new(pool);
//! let mut tx = store.begin().await?;
//! // ... postings ...
//! tx.commit().await?;
//! ```

pub mod inventory;

pub use inventory::{PostgresInventoryStore, PostgresInventoryTx};
