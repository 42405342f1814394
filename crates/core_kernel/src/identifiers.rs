//! Strongly-typed identifiers for domain entities
//!
//! Using newtype wrappers around UUIDs provides type safety and prevents
//! accidental mixing of different identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates a new time-ordered identifier (v7)
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Returns the identifier prefix for display
            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            /// Accepts both `PREFIX-<uuid>` and a bare UUID
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid_str = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Uuid::parse_str(uuid_str)
                    .map(Self)
                    .map_err(|e| CoreError::invalid_identifier(stringify!($name), s, e))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

// Tenancy and master data referenced by the ledger
define_id!(TenantId, "TEN");
define_id!(ItemId, "ITM");
define_id!(LocationId, "LOC");

// Ledger identifiers
define_id!(MovementId, "MOV");
define_id!(MovementLineId, "MOVL");

// Document identifiers
define_id!(AdjustmentId, "ADJ");
define_id!(AdjustmentLineId, "ADJL");
define_id!(CountId, "CNT");
define_id!(CountLineId, "CNTL");
define_id!(ReceiptId, "RCV");
define_id!(ReceiptLineId, "RCVL");
define_id!(QcEventId, "QC");
define_id!(PutawayId, "PUT");
define_id!(PutawayLineId, "PUTL");
define_id!(ReservationId, "RSV");

// Reconciliation identifiers
define_id!(ReconciliationRunId, "RUN");
define_id!(BalanceRepairId, "REP");
