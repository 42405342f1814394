//! Inventory adjustments
//!
//! An adjustment records a net inflow or outflow per (item, location, uom)
//! that is not backed by another document: damage, shrinkage, found stock.
//! Every line must carry a non-zero delta.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AdjustmentId, AdjustmentLineId, ItemId, LocationId, MovementId, Quantity, TenantId};

use crate::document::{DocumentStatus, PostableDocument};
use crate::error::InventoryError;
use crate::movement::{DocumentKind, DocumentRef, MovementDraft, MovementType};

/// Request to create an adjustment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAdjustment {
    pub occurred_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub external_ref: Option<String>,
    pub lines: Vec<NewAdjustmentLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAdjustmentLine {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub uom: String,
    pub quantity_delta: Quantity,
    pub reason_code: Option<String>,
}

impl NewAdjustment {
    /// Shape checks; zero deltas are left for posting to reject
    pub fn validate(&self) -> Result<(), InventoryError> {
        for (index, line) in self.lines.iter().enumerate() {
            if line.uom.trim().is_empty() {
                return Err(InventoryError::validation(format!(
                    "adjustment line {} is missing a unit of measure",
                    index + 1
                )));
            }
        }
        Ok(())
    }
}

/// A line of an adjustment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentLine {
    pub id: AdjustmentLineId,
    pub line_number: u32,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub uom: String,
    pub quantity_delta: Quantity,
    pub reason_code: Option<String>,
}

/// An inventory adjustment document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: AdjustmentId,
    pub tenant_id: TenantId,
    pub status: DocumentStatus,
    pub occurred_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub external_ref: Option<String>,
    pub movement_id: Option<MovementId>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub lines: Vec<AdjustmentLine>,
}

impl Adjustment {
    /// Creates a draft adjustment from a request
    pub fn draft(tenant_id: TenantId, request: NewAdjustment, now: DateTime<Utc>) -> Self {
        let lines = request
            .lines
            .into_iter()
            .enumerate()
            .map(|(index, line)| AdjustmentLine {
                id: AdjustmentLineId::new_v7(),
                line_number: (index + 1) as u32,
                item_id: line.item_id,
                location_id: line.location_id,
                uom: line.uom,
                quantity_delta: line.quantity_delta,
                reason_code: line.reason_code,
            })
            .collect();

        Self {
            id: AdjustmentId::new_v7(),
            tenant_id,
            status: DocumentStatus::Draft,
            occurred_at: request.occurred_at.unwrap_or(now),
            reason: request.reason,
            notes: request.notes,
            external_ref: request.external_ref,
            movement_id: None,
            created_at: now,
            posted_at: None,
            canceled_at: None,
            lines,
        }
    }

    /// Cancels a draft adjustment
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), InventoryError> {
        self.ensure_cancelable()?;
        self.status = DocumentStatus::Canceled;
        self.canceled_at = Some(now);
        Ok(())
    }
}

impl PostableDocument for Adjustment {
    fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(DocumentKind::Adjustment, self.id)
    }

    fn status(&self) -> DocumentStatus {
        self.status
    }

    fn movement_id(&self) -> Option<MovementId> {
        self.movement_id
    }

    fn movement_draft(&self) -> Result<MovementDraft, InventoryError> {
        let document = self.document_ref();
        if self.lines.is_empty() {
            return Err(InventoryError::NoLines { document });
        }

        let mut draft = MovementDraft::new(self.tenant_id, MovementType::Adjustment, document, self.occurred_at)
            .with_external_ref(self.external_ref.clone());
        for line in &self.lines {
            if line.quantity_delta.is_zero() {
                return Err(InventoryError::LineZero {
                    document,
                    line_number: line.line_number,
                });
            }
            draft = draft.line(
                line.item_id,
                line.location_id,
                line.uom.clone(),
                line.quantity_delta,
                line.reason_code.clone().or_else(|| self.reason.clone()),
            );
        }
        Ok(draft)
    }

    fn mark_posted(&mut self, movement_id: MovementId, at: DateTime<Utc>) {
        self.status = DocumentStatus::Posted;
        self.movement_id = Some(movement_id);
        self.posted_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(deltas: &[i64]) -> NewAdjustment {
        NewAdjustment {
            occurred_at: None,
            reason: Some("shrinkage".into()),
            notes: None,
            external_ref: None,
            lines: deltas
                .iter()
                .map(|delta| NewAdjustmentLine {
                    item_id: ItemId::new(),
                    location_id: LocationId::new(),
                    uom: "ea".into(),
                    quantity_delta: Quantity::from_i64(*delta),
                    reason_code: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_draft_builds_movement_lines() {
        let adjustment = Adjustment::draft(TenantId::new(), request(&[5, -2]), Utc::now());
        let draft = adjustment.movement_draft().unwrap();
        assert_eq!(draft.movement_type, MovementType::Adjustment);
        assert_eq!(draft.lines.len(), 2);
        assert_eq!(draft.lines[1].quantity_delta, Quantity::from_i64(-2));
        assert_eq!(draft.lines[0].reason_code.as_deref(), Some("shrinkage"));
    }

    #[test]
    fn test_zero_line_is_line_zero() {
        let adjustment = Adjustment::draft(TenantId::new(), request(&[5, 0]), Utc::now());
        match adjustment.movement_draft() {
            Err(InventoryError::LineZero { line_number, .. }) => assert_eq!(line_number, 2),
            other => panic!("expected LineZero, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_adjustment_is_no_lines() {
        let adjustment = Adjustment::draft(TenantId::new(), request(&[]), Utc::now());
        assert_eq!(adjustment.movement_draft().unwrap_err().code(), "NO_LINES");
    }

    #[test]
    fn test_cancel_then_post_is_canceled() {
        let mut adjustment = Adjustment::draft(TenantId::new(), request(&[1]), Utc::now());
        adjustment.cancel(Utc::now()).unwrap();
        assert_eq!(adjustment.ensure_postable().unwrap_err().code(), "CANCELED");
        assert_eq!(adjustment.cancel(Utc::now()).unwrap_err().code(), "CANCELED");
    }
}
