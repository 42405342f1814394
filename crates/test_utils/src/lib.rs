//! Test Utilities Crate
//!
//! Shared test infrastructure for the inventory ledger test suite.
//!
//! # Modules
//!
//! - `fixtures`: Fixed timestamps, identifiers and keys
//! - `builders`: Builders for service requests with sensible defaults
//! - `database`: PostgreSQL test containers and store setup
//! - `assertions`: Balance and error assertions with readable failures
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
