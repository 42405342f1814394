//! Putaway: moving received stock out of staging
//!
//! A putaway is planned as a draft whose pending lines reserve capacity on
//! their receipt lines. Posting turns the pending lines into one transfer
//! movement (staging debit, destination credit per line) and completes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use core_kernel::{ItemId, LocationId, MovementId, PutawayId, PutawayLineId, Quantity, ReceiptId, ReceiptLineId, TenantId};

use crate::document::{DocumentStatus, PostableDocument};
use crate::error::InventoryError;
use crate::movement::{DocumentKind, DocumentRef, MovementDraft, MovementType};
use crate::receipt::ReceiptLineContext;

/// Reason code stamped on putaway transfer lines
pub const PUTAWAY_REASON: &str = "putaway";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutawayLineStatus {
    Pending,
    Completed,
    Canceled,
}

impl PutawayLineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PutawayLineStatus::Pending => "pending",
            PutawayLineStatus::Completed => "completed",
            PutawayLineStatus::Canceled => "canceled",
        }
    }
}

impl FromStr for PutawayLineStatus {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PutawayLineStatus::Pending),
            "completed" => Ok(PutawayLineStatus::Completed),
            "canceled" => Ok(PutawayLineStatus::Canceled),
            other => Err(InventoryError::validation(format!("unknown putaway line status '{}'", other))),
        }
    }
}

/// Request to plan a putaway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPutaway {
    /// When set, every line must come from this receipt
    pub receipt_id: Option<ReceiptId>,
    pub notes: Option<String>,
    pub lines: Vec<NewPutawayLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPutawayLine {
    pub receipt_line_id: ReceiptLineId,
    /// Defaults to the receipt's staging location
    pub from_location_id: Option<LocationId>,
    pub to_location_id: LocationId,
    pub uom: String,
    pub quantity: Quantity,
}

impl NewPutaway {
    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.lines.is_empty() {
            return Err(InventoryError::validation("a putaway needs at least one line"));
        }
        for (index, line) in self.lines.iter().enumerate() {
            if line.uom.trim().is_empty() {
                return Err(InventoryError::validation(format!(
                    "putaway line {} is missing a unit of measure",
                    index + 1
                )));
            }
            if !line.quantity.is_positive() {
                return Err(InventoryError::validation(format!(
                    "putaway line {} must move a positive quantity",
                    index + 1
                )));
            }
        }
        Ok(())
    }

    /// Total requested per receipt line across the whole request
    pub fn requested_by_receipt_line(&self) -> BTreeMap<ReceiptLineId, Quantity> {
        let mut totals = BTreeMap::new();
        for line in &self.lines {
            *totals.entry(line.receipt_line_id).or_insert_with(Quantity::zero) += line.quantity;
        }
        totals
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutawayLine {
    pub id: PutawayLineId,
    pub line_number: u32,
    pub receipt_line_id: ReceiptLineId,
    pub item_id: ItemId,
    pub uom: String,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub quantity: Quantity,
    pub status: PutawayLineStatus,
}

impl PutawayLine {
    /// Builds a pending line against a receipt line, checking eligibility
    pub fn plan(
        line_number: u32,
        receipt_line: &ReceiptLineContext,
        request: &NewPutawayLine,
    ) -> Result<Self, InventoryError> {
        receipt_line.ensure_active()?;
        if request.uom != receipt_line.line.uom {
            return Err(InventoryError::UomMismatch {
                expected: receipt_line.line.uom.clone(),
                actual: request.uom.clone(),
            });
        }
        let from_location_id = request
            .from_location_id
            .unwrap_or(receipt_line.staging_location_id);
        if from_location_id == request.to_location_id {
            return Err(InventoryError::SameLocation {
                location_id: from_location_id,
            });
        }

        Ok(Self {
            id: PutawayLineId::new_v7(),
            line_number,
            receipt_line_id: receipt_line.line.id,
            item_id: receipt_line.line.item_id,
            uom: request.uom.clone(),
            from_location_id,
            to_location_id: request.to_location_id,
            quantity: request.quantity,
            status: PutawayLineStatus::Pending,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == PutawayLineStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Putaway {
    pub id: PutawayId,
    pub tenant_id: TenantId,
    pub status: DocumentStatus,
    pub receipt_id: Option<ReceiptId>,
    pub notes: Option<String>,
    pub movement_id: Option<MovementId>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub lines: Vec<PutawayLine>,
}

impl Putaway {
    pub fn draft(
        tenant_id: TenantId,
        receipt_id: Option<ReceiptId>,
        notes: Option<String>,
        lines: Vec<PutawayLine>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PutawayId::new_v7(),
            tenant_id,
            status: DocumentStatus::Draft,
            receipt_id,
            notes,
            movement_id: None,
            created_at: now,
            posted_at: None,
            canceled_at: None,
            lines,
        }
    }

    /// Pending quantity per receipt line; what this putaway holds in reserve
    pub fn pending_by_receipt_line(&self) -> BTreeMap<ReceiptLineId, Quantity> {
        let mut totals = BTreeMap::new();
        for line in self.lines.iter().filter(|line| line.is_pending()) {
            *totals.entry(line.receipt_line_id).or_insert_with(Quantity::zero) += line.quantity;
        }
        totals
    }

    /// Cancels the putaway and releases its pending lines
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), InventoryError> {
        self.ensure_cancelable()?;
        self.status = DocumentStatus::Canceled;
        self.canceled_at = Some(now);
        for line in self.lines.iter_mut().filter(|line| line.status == PutawayLineStatus::Pending) {
            line.status = PutawayLineStatus::Canceled;
        }
        Ok(())
    }
}

impl PostableDocument for Putaway {
    fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(DocumentKind::Putaway, self.id)
    }

    fn status(&self) -> DocumentStatus {
        self.status
    }

    fn movement_id(&self) -> Option<MovementId> {
        self.movement_id
    }

    fn movement_draft(&self) -> Result<MovementDraft, InventoryError> {
        let document = self.document_ref();
        let pending: Vec<&PutawayLine> = self.lines.iter().filter(|line| line.is_pending()).collect();
        if pending.is_empty() {
            return Err(InventoryError::NoLines { document });
        }

        let mut draft = MovementDraft::new(self.tenant_id, MovementType::Transfer, document, self.created_at);
        for line in pending {
            if !line.quantity.is_positive() {
                continue;
            }
            draft = draft
                .line(
                    line.item_id,
                    line.from_location_id,
                    line.uom.clone(),
                    -line.quantity,
                    Some(PUTAWAY_REASON.to_string()),
                )
                .line(
                    line.item_id,
                    line.to_location_id,
                    line.uom.clone(),
                    line.quantity,
                    Some(PUTAWAY_REASON.to_string()),
                );
        }
        Ok(draft)
    }

    fn mark_posted(&mut self, movement_id: MovementId, at: DateTime<Utc>) {
        self.status = DocumentStatus::Posted;
        self.movement_id = Some(movement_id);
        self.posted_at = Some(at);
        for line in self.lines.iter_mut().filter(|line| line.status == PutawayLineStatus::Pending) {
            line.status = PutawayLineStatus::Completed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::{ReceiptLine, ReceiptStatus};

    fn receipt_line(received: i64) -> ReceiptLineContext {
        let receipt_id = ReceiptId::new();
        ReceiptLineContext {
            tenant_id: TenantId::new(),
            receipt_id,
            receipt_status: ReceiptStatus::Posted,
            staging_location_id: LocationId::new(),
            line: ReceiptLine {
                id: ReceiptLineId::new(),
                receipt_id,
                line_number: 1,
                item_id: ItemId::new(),
                uom: "ea".into(),
                quantity_received: Quantity::from_i64(received),
            },
        }
    }

    fn request(context: &ReceiptLineContext, quantity: i64) -> NewPutawayLine {
        NewPutawayLine {
            receipt_line_id: context.line.id,
            from_location_id: None,
            to_location_id: LocationId::new(),
            uom: "ea".into(),
            quantity: Quantity::from_i64(quantity),
        }
    }

    #[test]
    fn test_plan_defaults_source_to_staging() {
        let context = receipt_line(20);
        let line = PutawayLine::plan(1, &context, &request(&context, 5)).unwrap();
        assert_eq!(line.from_location_id, context.staging_location_id);
        assert_eq!(line.item_id, context.line.item_id);
        assert!(line.is_pending());
    }

    #[test]
    fn test_plan_rejects_uom_mismatch() {
        let context = receipt_line(20);
        let mut req = request(&context, 5);
        req.uom = "kg".into();
        assert_eq!(PutawayLine::plan(1, &context, &req).unwrap_err().code(), "UOM_MISMATCH");
    }

    #[test]
    fn test_plan_rejects_same_location() {
        let context = receipt_line(20);
        let mut req = request(&context, 5);
        req.to_location_id = context.staging_location_id;
        assert_eq!(PutawayLine::plan(1, &context, &req).unwrap_err().code(), "SAME_LOCATION");
    }

    #[test]
    fn test_plan_rejects_voided_receipt() {
        let mut context = receipt_line(20);
        context.receipt_status = ReceiptStatus::Voided;
        assert_eq!(
            PutawayLine::plan(1, &context, &request(&context, 5)).unwrap_err().code(),
            "NOT_ELIGIBLE"
        );
    }

    #[test]
    fn test_transfer_draft_has_two_lines_per_putaway_line() {
        let context = receipt_line(20);
        let line = PutawayLine::plan(1, &context, &request(&context, 8)).unwrap();
        let putaway = Putaway::draft(TenantId::new(), None, None, vec![line], Utc::now());

        let draft = putaway.movement_draft().unwrap();
        assert_eq!(draft.movement_type, MovementType::Transfer);
        assert_eq!(draft.lines.len(), 2);
        assert_eq!(draft.lines[0].quantity_delta, Quantity::from_i64(-8));
        assert_eq!(draft.lines[0].location_id, context.staging_location_id);
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_posting_completes_pending_lines() {
        let context = receipt_line(20);
        let line = PutawayLine::plan(1, &context, &request(&context, 8)).unwrap();
        let mut putaway = Putaway::draft(TenantId::new(), None, None, vec![line], Utc::now());
        putaway.mark_posted(MovementId::new(), Utc::now());

        assert_eq!(putaway.lines[0].status, PutawayLineStatus::Completed);
        assert!(putaway.pending_by_receipt_line().is_empty());
        assert_eq!(putaway.ensure_postable().unwrap_err().code(), "ALREADY_POSTED");
    }

    #[test]
    fn test_cancel_releases_pending() {
        let context = receipt_line(20);
        let line = PutawayLine::plan(1, &context, &request(&context, 8)).unwrap();
        let mut putaway = Putaway::draft(TenantId::new(), None, None, vec![line], Utc::now());
        putaway.cancel(Utc::now()).unwrap();

        assert_eq!(putaway.lines[0].status, PutawayLineStatus::Canceled);
        assert_eq!(putaway.movement_draft().unwrap_err().code(), "NO_LINES");
    }

    #[test]
    fn test_requested_totals_group_by_receipt_line() {
        let context = receipt_line(20);
        let planned = NewPutaway {
            receipt_id: None,
            notes: None,
            lines: vec![request(&context, 12), request(&context, 8)],
        };
        assert_eq!(planned.requested_by_receipt_line()[&context.line.id], Quantity::from_i64(20));
    }
}
