//! Infrastructure Database Layer
//!
//! PostgreSQL storage for the inventory ledger, built on SQLx.
//!
//! # Architecture
//!
//! The crate follows the repository pattern: `repositories` holds the SQL
//! for each aggregate, and `adapters::PostgresInventoryStore` implements the
//! `InventoryStore` port on top of them. Domain services never see SQL.
//!
//! # Consistency Model
//!
//! - Every posting runs in one transaction (`PostgresInventoryTx`)
//! - Documents and receipt lines are locked with `SELECT .. FOR UPDATE`
//! - Snapshot rows are updated with an additive upsert, which locks them
//! - The ledger tables reject UPDATE and DELETE through triggers
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, DatabaseConfig, PostgresInventoryStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/inventory").run_migrations(true)).await?;
//! let store = PostgresInventoryStore::new(pool);
//! ```

pub mod pool;
pub mod error;
pub mod repositories;
pub mod adapters;

pub use pool::{DatabasePool, create_pool, run_migrations, DatabaseConfig};
pub use error::DatabaseError;
pub use adapters::{PostgresInventoryStore, PostgresInventoryTx};
