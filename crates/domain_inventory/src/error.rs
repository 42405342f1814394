//! Inventory domain errors
//!
//! Every failure the ledger can report is a variant of `InventoryError`.
//! Callers discriminate on the variant (or on `code()` at a transport
//! boundary), never on the message text.

use thiserror::Error;

use core_kernel::{ItemId, LocationId, PortError, Quantity, QuantityError, ReceiptLineId, TenantId};

use crate::availability::BlockedReason;
use crate::balance::BalanceKey;
use crate::movement::DocumentRef;

/// Broad classes of failure, used for retry and reporting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request, rejected before a transaction opens
    Validation,
    /// A referenced document or record does not exist
    NotFound,
    /// The current state of a document forbids the operation
    Conflict,
    /// A referenced item, location or document row is missing in the store
    Reference,
    /// Idempotency key misuse or an in-flight duplicate
    Idempotency,
    /// Ledger or snapshot integrity would be violated
    Integrity,
    /// The store failed underneath the operation
    Storage,
}

/// Errors that can occur in the inventory domain
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("{document} has already been posted")]
    AlreadyPosted { document: DocumentRef },

    #[error("{document} has been canceled")]
    Canceled { document: DocumentRef },

    #[error("{document} has no lines to post")]
    NoLines { document: DocumentRef },

    #[error("Line {line_number} of {document} has a zero quantity")]
    LineZero { document: DocumentRef, line_number: u32 },

    #[error("Receipt line {receipt_line_id} is blocked: {reason}")]
    QcBlocked {
        receipt_line_id: ReceiptLineId,
        reason: BlockedReason,
    },

    #[error("Requested {requested} exceeds available {available}")]
    QuantityExceeded {
        requested: Quantity,
        available: Quantity,
    },

    #[error("Unit of measure mismatch: expected {expected}, got {actual}")]
    UomMismatch { expected: String, actual: String },

    #[error("Source and destination are both {location_id}")]
    SameLocation { location_id: LocationId },

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Balance for {key} would go negative (on hand {on_hand}, reserved {reserved}, allocated {allocated})")]
    NegativeBalance {
        key: BalanceKey,
        on_hand: Quantity,
        reserved: Quantity,
        allocated: Quantity,
    },

    #[error("Transfer does not conserve item {item_id}: lines net to {net}")]
    UnbalancedTransfer { item_id: ItemId, net: Quantity },

    #[error("Invalid {entity} status transition from {from} to {to}")]
    InvalidStatusTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Idempotency key '{key}' was already used for a different request")]
    IdempotencyHashMismatch { key: String },

    #[error("Request with idempotency key '{key}' is still in progress")]
    IdempotencyInProgress { key: String },

    #[error("Reconciliation failed for tenant {tenant_id}: {mismatch_count} mismatches remain")]
    ReconciliationFailed {
        tenant_id: TenantId,
        mismatch_count: usize,
    },

    #[error("Storage error: {0}")]
    Storage(#[source] PortError),
}

impl InventoryError {
    /// Creates a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        InventoryError::Validation(message.into())
    }

    /// Creates a NotFound error for the named entity
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        InventoryError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a NotEligible error
    pub fn not_eligible(message: impl Into<String>) -> Self {
        InventoryError::NotEligible(message.into())
    }

    /// Stable machine-readable code for the condition
    pub fn code(&self) -> &'static str {
        match self {
            InventoryError::Validation(_) => "VALIDATION",
            InventoryError::NotFound { .. } => "NOT_FOUND",
            InventoryError::AlreadyPosted { .. } => "ALREADY_POSTED",
            InventoryError::Canceled { .. } => "CANCELED",
            InventoryError::NoLines { .. } => "NO_LINES",
            InventoryError::LineZero { .. } => "LINE_ZERO",
            InventoryError::QcBlocked { .. } => "QC_BLOCKED",
            InventoryError::QuantityExceeded { .. } => "QUANTITY_EXCEEDED",
            InventoryError::UomMismatch { .. } => "UOM_MISMATCH",
            InventoryError::SameLocation { .. } => "SAME_LOCATION",
            InventoryError::NotEligible(_) => "NOT_ELIGIBLE",
            InventoryError::InvalidReference(_) => "INVALID_REFERENCE",
            InventoryError::NegativeBalance { .. } => "NEGATIVE_BALANCE",
            InventoryError::UnbalancedTransfer { .. } => "UNBALANCED_TRANSFER",
            InventoryError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            InventoryError::IdempotencyHashMismatch { .. } => "IDEMPOTENCY_HASH_MISMATCH",
            InventoryError::IdempotencyInProgress { .. } => "IDEMPOTENCY_IN_PROGRESS",
            InventoryError::ReconciliationFailed { .. } => "RECONCILIATION_FAILED",
            InventoryError::Storage(_) => "STORAGE",
        }
    }

    /// The class of failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::Validation(_) => ErrorKind::Validation,
            InventoryError::NotFound { .. } => ErrorKind::NotFound,
            InventoryError::AlreadyPosted { .. }
            | InventoryError::Canceled { .. }
            | InventoryError::NoLines { .. }
            | InventoryError::LineZero { .. }
            | InventoryError::QcBlocked { .. }
            | InventoryError::QuantityExceeded { .. }
            | InventoryError::UomMismatch { .. }
            | InventoryError::SameLocation { .. }
            | InventoryError::NotEligible(_)
            | InventoryError::InvalidStatusTransition { .. } => ErrorKind::Conflict,
            InventoryError::InvalidReference(_) => ErrorKind::Reference,
            InventoryError::IdempotencyHashMismatch { .. }
            | InventoryError::IdempotencyInProgress { .. } => ErrorKind::Idempotency,
            InventoryError::NegativeBalance { .. }
            | InventoryError::UnbalancedTransfer { .. }
            | InventoryError::ReconciliationFailed { .. } => ErrorKind::Integrity,
            InventoryError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True only for transient store failures; domain conflicts reproduce on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            InventoryError::Storage(source) => source.is_transient(),
            _ => false,
        }
    }
}

impl From<PortError> for InventoryError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::NotFound { entity_type, id } => InventoryError::NotFound {
                entity: entity_type,
                id,
            },
            PortError::InvalidReference { message } => InventoryError::InvalidReference(message),
            PortError::Validation { message, .. } => InventoryError::Validation(message),
            other => InventoryError::Storage(other),
        }
    }
}

impl From<QuantityError> for InventoryError {
    fn from(error: QuantityError) -> Self {
        InventoryError::Validation(error.to_string())
    }
}

/// Result type for the inventory domain
pub type InventoryResult<T> = Result<T, InventoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_not_found_maps_to_domain_not_found() {
        let error: InventoryError = PortError::not_found("Receipt", "RCV-1").into();
        assert_eq!(error.code(), "NOT_FOUND");
        assert!(error.to_string().contains("Receipt"));
    }

    #[test]
    fn test_invalid_reference_is_translated() {
        let error: InventoryError = PortError::invalid_reference("unknown item").into();
        assert!(matches!(error, InventoryError::InvalidReference(_)));
        assert_eq!(error.kind(), ErrorKind::Reference);
    }

    #[test]
    fn test_only_transient_storage_errors_are_retryable() {
        let transient: InventoryError = PortError::connection("reset").into();
        assert!(transient.is_retryable());

        let conflict: InventoryError = PortError::conflict("duplicate").into();
        assert!(!conflict.is_retryable());

        let mismatch = InventoryError::IdempotencyHashMismatch { key: "abc".into() };
        assert!(!mismatch.is_retryable());
        assert_eq!(mismatch.kind(), ErrorKind::Idempotency);
    }
}
