//! Goods receipts
//!
//! A receipt is posted as soon as it is created: its lines land in a
//! staging location through a receipt-derived movement. Voiding posts the
//! compensating movement and is refused while putaway work still references
//! the receipt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use core_kernel::{ItemId, LocationId, MovementId, Quantity, ReceiptId, ReceiptLineId, TenantId};

use crate::availability::AvailabilityContext;
use crate::error::InventoryError;
use crate::movement::{DocumentKind, DocumentRef, MovementDraft, MovementType};

/// Reason code stamped on receipt-derived movement lines
pub const RECEIPT_REASON: &str = "receipt";
/// Reason code stamped on the compensating lines of a void
pub const RECEIPT_VOID_REASON: &str = "receipt_void";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Posted,
    Voided,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Posted => "posted",
            ReceiptStatus::Voided => "voided",
        }
    }
}

impl FromStr for ReceiptStatus {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posted" => Ok(ReceiptStatus::Posted),
            "voided" => Ok(ReceiptStatus::Voided),
            other => Err(InventoryError::validation(format!("unknown receipt status '{}'", other))),
        }
    }
}

/// Request to receive goods; also the payload hashed for idempotency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReceipt {
    pub purchase_order_ref: Option<String>,
    pub staging_location_id: LocationId,
    pub received_at: Option<DateTime<Utc>>,
    pub lines: Vec<NewReceiptLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReceiptLine {
    pub item_id: ItemId,
    pub uom: String,
    pub quantity_received: Quantity,
}

impl NewReceipt {
    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.lines.is_empty() {
            return Err(InventoryError::validation("a receipt needs at least one line"));
        }
        for (index, line) in self.lines.iter().enumerate() {
            if line.uom.trim().is_empty() {
                return Err(InventoryError::validation(format!(
                    "receipt line {} is missing a unit of measure",
                    index + 1
                )));
            }
            if !line.quantity_received.is_positive() {
                return Err(InventoryError::validation(format!(
                    "receipt line {} must receive a positive quantity",
                    index + 1
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub id: ReceiptLineId,
    pub receipt_id: ReceiptId,
    pub line_number: u32,
    pub item_id: ItemId,
    pub uom: String,
    pub quantity_received: Quantity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: ReceiptId,
    pub tenant_id: TenantId,
    pub status: ReceiptStatus,
    pub purchase_order_ref: Option<String>,
    pub staging_location_id: LocationId,
    pub received_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
    pub movement_id: Option<MovementId>,
    pub void_movement_id: Option<MovementId>,
    pub void_reason: Option<String>,
    pub voided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<ReceiptLine>,
}

impl Receipt {
    pub fn receive(
        tenant_id: TenantId,
        request: NewReceipt,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = ReceiptId::new_v7();
        let lines = request
            .lines
            .into_iter()
            .enumerate()
            .map(|(index, line)| ReceiptLine {
                id: ReceiptLineId::new_v7(),
                receipt_id: id,
                line_number: (index + 1) as u32,
                item_id: line.item_id,
                uom: line.uom,
                quantity_received: line.quantity_received,
            })
            .collect();

        Self {
            id,
            tenant_id,
            status: ReceiptStatus::Posted,
            purchase_order_ref: request.purchase_order_ref,
            staging_location_id: request.staging_location_id,
            received_at: request.received_at.unwrap_or(now),
            idempotency_key,
            movement_id: None,
            void_movement_id: None,
            void_reason: None,
            voided_at: None,
            created_at: now,
            lines,
        }
    }

    pub fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(DocumentKind::Receipt, self.id)
    }

    /// Inbound movement: each line lands in staging
    pub fn receipt_movement_draft(&self) -> MovementDraft {
        self.movement_draft(false, RECEIPT_REASON)
            .with_idempotency_key(self.idempotency_key.clone())
    }

    /// Compensating movement that takes the received quantity back out of staging
    pub fn void_movement_draft(&self) -> MovementDraft {
        self.movement_draft(true, RECEIPT_VOID_REASON)
    }

    fn movement_draft(&self, reversing: bool, reason: &str) -> MovementDraft {
        let draft = MovementDraft::new(
            self.tenant_id,
            MovementType::ReceiptDerived,
            self.document_ref(),
            self.received_at,
        )
        .with_external_ref(self.purchase_order_ref.clone());

        self.lines.iter().fold(draft, |draft, line| {
            let delta = if reversing { -line.quantity_received } else { line.quantity_received };
            draft.line(
                line.item_id,
                self.staging_location_id,
                line.uom.clone(),
                delta,
                Some(reason.to_string()),
            )
        })
    }

    pub fn mark_posted(&mut self, movement_id: MovementId) {
        self.movement_id = Some(movement_id);
    }

    /// Fails with CANCELED on a second void
    pub fn ensure_voidable(&self) -> Result<(), InventoryError> {
        if self.status == ReceiptStatus::Voided {
            return Err(InventoryError::Canceled {
                document: self.document_ref(),
            });
        }
        Ok(())
    }

    pub fn void(
        &mut self,
        movement_id: MovementId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InventoryError> {
        self.ensure_voidable()?;
        self.status = ReceiptStatus::Voided;
        self.void_movement_id = Some(movement_id);
        self.void_reason = reason;
        self.voided_at = Some(now);
        Ok(())
    }
}

/// A receipt line together with the header facts the putaway and QC flows need
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLineContext {
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub receipt_status: ReceiptStatus,
    pub staging_location_id: LocationId,
    pub line: ReceiptLine,
}

impl ReceiptLineContext {
    /// QC and putaway work is only allowed against a live receipt
    pub fn ensure_active(&self) -> Result<(), InventoryError> {
        if self.receipt_status == ReceiptStatus::Voided {
            return Err(InventoryError::not_eligible(format!(
                "receipt {} has been voided",
                self.receipt_id
            )));
        }
        Ok(())
    }

    pub fn availability_context(&self) -> AvailabilityContext {
        AvailabilityContext {
            receipt_line_id: self.line.id,
            quantity_received: self.line.quantity_received,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt() -> Receipt {
        let request = NewReceipt {
            purchase_order_ref: Some("PO-1".into()),
            staging_location_id: LocationId::new(),
            received_at: None,
            lines: vec![
                NewReceiptLine {
                    item_id: ItemId::new(),
                    uom: "ea".into(),
                    quantity_received: Quantity::from_i64(50),
                },
                NewReceiptLine {
                    item_id: ItemId::new(),
                    uom: "kg".into(),
                    quantity_received: Quantity::from_i64(7),
                },
            ],
        };
        Receipt::receive(TenantId::new(), request, Some("abc".into()), Utc::now())
    }

    #[test]
    fn test_receipt_is_created_posted() {
        let receipt = receipt();
        assert_eq!(receipt.status, ReceiptStatus::Posted);
        assert!(receipt.lines.iter().all(|line| line.receipt_id == receipt.id));
    }

    #[test]
    fn test_receipt_and_void_drafts_cancel_out() {
        let receipt = receipt();
        let inbound = receipt.receipt_movement_draft();
        let outbound = receipt.void_movement_draft();

        assert_eq!(inbound.idempotency_key.as_deref(), Some("abc"));
        for (a, b) in inbound.lines.iter().zip(outbound.lines.iter()) {
            assert_eq!(a.quantity_delta + b.quantity_delta, Quantity::zero());
            assert_eq!(a.location_id, receipt.staging_location_id);
        }
    }

    #[test]
    fn test_second_void_is_canceled() {
        let mut receipt = receipt();
        receipt.void(MovementId::new(), None, Utc::now()).unwrap();
        let error = receipt.void(MovementId::new(), None, Utc::now()).unwrap_err();
        assert_eq!(error.code(), "CANCELED");
    }

    #[test]
    fn test_request_rejects_non_positive_lines() {
        let request = NewReceipt {
            purchase_order_ref: None,
            staging_location_id: LocationId::new(),
            received_at: None,
            lines: vec![NewReceiptLine {
                item_id: ItemId::new(),
                uom: "ea".into(),
                quantity_received: Quantity::zero(),
            }],
        };
        assert!(matches!(request.validate(), Err(InventoryError::Validation(_))));
    }
}
