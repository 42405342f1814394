//! Repository implementations for the inventory tables
//!
//! Each repository owns the SQL for one aggregate and maps between its rows
//! and the domain types. Repositories take an explicit `PgConnection`, so
//! the same statement runs on a pooled connection or inside the transaction
//! of a unit of work.
//!
//! # Conventions
//!
//! - Runtime-checked `sqlx::query` / `query_as` with `FromRow` row structs
//! - Enumerations are stored as text and parsed back with `FromStr`
//! - `lock = true` appends `FOR UPDATE`, holding the row until commit
//! - Every query filters on `tenant_id`

use std::str::FromStr;

use crate::error::DatabaseError;

pub mod ledger;
pub mod balances;
pub mod documents;
pub mod receiving;
pub mod putaways;
pub mod reservations;
pub mod idempotency;

pub use ledger::LedgerRepository;
pub use balances::BalanceRepository;
pub use documents::{AdjustmentRepository, CountRepository};
pub use receiving::ReceiptRepository;
pub use putaways::PutawayRepository;
pub use reservations::ReservationRepository;
pub use idempotency::IdempotencyRepository;

/// Appends a row lock to a SELECT when requested
pub(crate) fn with_lock(sql: &str, lock: bool) -> String {
    if lock {
        format!("{} FOR UPDATE", sql)
    } else {
        sql.to_string()
    }
}

/// Parses a text column into a domain enumeration
pub(crate) fn parse_column<T>(column: &str, value: &str) -> Result<T, DatabaseError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| DatabaseError::decode(column, e))
}

/// Converts a stored line number back to the domain width
pub(crate) fn line_number(value: i32) -> Result<u32, DatabaseError> {
    u32::try_from(value).map_err(|_| DatabaseError::decode("line_number", format!("{} is negative", value)))
}
