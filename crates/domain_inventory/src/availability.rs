//! Availability of received quantity for putaway
//!
//! `availability` is a pure function of a receipt line's received quantity,
//! its QC totals and its putaway totals. It is evaluated once when a putaway
//! is planned and again, under a row lock on the receipt line, when the
//! putaway is posted.

use serde::{Deserialize, Serialize};
use std::fmt;

use core_kernel::{Quantity, ReceiptLineId};

use crate::error::InventoryError;
use crate::qc::QcTotals;

/// Static facts about the receipt line being evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityContext {
    pub receipt_line_id: ReceiptLineId,
    pub quantity_received: Quantity,
}

/// Putaway quantities already committed against a receipt line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutawayTotals {
    /// Quantity on completed lines of posted putaways
    pub posted: Quantity,
    /// Quantity on pending lines of draft putaways
    pub pending: Quantity,
}

/// Why nothing can be planned against a receipt line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    QcHoldUnresolved,
    NoRemainingQuantity,
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockedReason::QcHoldUnresolved => f.write_str("QC hold unresolved"),
            BlockedReason::NoRemainingQuantity => {
                f.write_str("No remaining quantity available for putaway")
            }
        }
    }
}

/// Result of an availability evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub receipt_line_id: ReceiptLineId,
    /// Quantity QC allows to leave staging at all
    pub usable: Quantity,
    pub available_for_planning: Quantity,
    pub remaining_after_posted: Quantity,
    pub blocked_reason: Option<BlockedReason>,
}

/// Computes what can still be put away from a receipt line
///
/// `exclude_pending` is subtracted from the pending total before it is
/// charged, so a putaway being re-validated does not count its own lines
/// against itself.
pub fn availability(
    context: AvailabilityContext,
    qc: QcTotals,
    totals: PutawayTotals,
    exclude_pending: Quantity,
) -> Availability {
    let base_available = (context.quantity_received - qc.reject).clamp_non_negative();

    let mut blocked_reason = None;
    let usable = if qc.accept.is_positive() {
        base_available.min(qc.accept)
    } else if qc.hold.is_positive() {
        blocked_reason = Some(BlockedReason::QcHoldUnresolved);
        Quantity::zero()
    } else {
        // No QC events yet: provisionally accept everything not rejected.
        base_available
    };

    let remaining_after_posted = (usable - totals.posted).clamp_non_negative();
    let pending_effective = (totals.pending - exclude_pending).clamp_non_negative();
    let available_for_planning = (usable - totals.posted - pending_effective).clamp_non_negative();

    if blocked_reason.is_none()
        && !available_for_planning.is_positive()
        && !remaining_after_posted.is_positive()
    {
        blocked_reason = Some(BlockedReason::NoRemainingQuantity);
    }

    Availability {
        receipt_line_id: context.receipt_line_id,
        usable,
        available_for_planning,
        remaining_after_posted,
        blocked_reason,
    }
}

impl Availability {
    /// Guard applied when a putaway is created
    pub fn check_planning(&self, requested: Quantity) -> Result<(), InventoryError> {
        if requested.exceeds(self.available_for_planning) {
            return Err(self.rejection(requested, self.available_for_planning));
        }
        Ok(())
    }

    /// Guard applied when a putaway is posted
    ///
    /// Posting must fit both the planning headroom and what is left after
    /// other putaways have already posted.
    pub fn check_posting(&self, requested: Quantity) -> Result<(), InventoryError> {
        let bound = self.available_for_planning.min(self.remaining_after_posted);
        if requested.exceeds(bound) {
            return Err(self.rejection(requested, bound));
        }
        Ok(())
    }

    fn rejection(&self, requested: Quantity, available: Quantity) -> InventoryError {
        match self.blocked_reason {
            Some(reason @ BlockedReason::QcHoldUnresolved) => InventoryError::QcBlocked {
                receipt_line_id: self.receipt_line_id,
                reason,
            },
            _ => InventoryError::QuantityExceeded { requested, available },
        }
    }
}
