//! Physical inventory counts
//!
//! A count records what was physically found at each key. At posting time
//! the ledger on-hand for every line is captured as the system quantity and
//! only the variance (`counted - system`) is written to the ledger. Lines
//! whose variance is zero are skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use core_kernel::{CountId, CountLineId, ItemId, LocationId, MovementId, Quantity, TenantId};

use crate::balance::BalanceKey;
use crate::document::{DocumentStatus, PostableDocument};
use crate::error::InventoryError;
use crate::movement::{DocumentKind, DocumentRef, MovementDraft, MovementType};

/// Reason code stamped on variance lines that did not supply one
pub const DEFAULT_COUNT_REASON: &str = "cycle_count";

/// Request to create a count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCount {
    pub occurred_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub lines: Vec<NewCountLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCountLine {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub uom: String,
    pub counted_quantity: Quantity,
    pub reason_code: Option<String>,
}

impl NewCount {
    pub fn validate(&self) -> Result<(), InventoryError> {
        let mut seen = BTreeSet::new();
        for (index, line) in self.lines.iter().enumerate() {
            let number = index + 1;
            if line.uom.trim().is_empty() {
                return Err(InventoryError::validation(format!(
                    "count line {} is missing a unit of measure",
                    number
                )));
            }
            if line.counted_quantity.is_negative() {
                return Err(InventoryError::validation(format!(
                    "count line {} has a negative counted quantity",
                    number
                )));
            }
            let key = BalanceKey::new(line.item_id, line.location_id, line.uom.clone());
            if !seen.insert(key.clone()) {
                return Err(InventoryError::validation(format!(
                    "count line {} repeats {}",
                    number, key
                )));
            }
        }
        Ok(())
    }
}

/// A counted line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLine {
    pub id: CountLineId,
    pub line_number: u32,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub uom: String,
    pub counted_quantity: Quantity,
    /// Ledger on-hand captured when the count was posted
    pub system_quantity: Option<Quantity>,
    pub variance: Option<Quantity>,
    pub reason_code: Option<String>,
}

impl CountLine {
    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.item_id, self.location_id, self.uom.clone())
    }

    /// Records the ledger quantity and derives the variance
    pub fn record_system_quantity(&mut self, on_hand: Quantity) {
        self.system_quantity = Some(on_hand);
        self.variance = Some(self.counted_quantity - on_hand);
    }
}

/// A physical count document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCount {
    pub id: CountId,
    pub tenant_id: TenantId,
    pub status: DocumentStatus,
    pub occurred_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub movement_id: Option<MovementId>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub lines: Vec<CountLine>,
}

impl InventoryCount {
    pub fn draft(tenant_id: TenantId, request: NewCount, now: DateTime<Utc>) -> Self {
        let lines = request
            .lines
            .into_iter()
            .enumerate()
            .map(|(index, line)| CountLine {
                id: CountLineId::new_v7(),
                line_number: (index + 1) as u32,
                item_id: line.item_id,
                location_id: line.location_id,
                uom: line.uom,
                counted_quantity: line.counted_quantity,
                system_quantity: None,
                variance: None,
                reason_code: line.reason_code,
            })
            .collect();

        Self {
            id: CountId::new_v7(),
            tenant_id,
            status: DocumentStatus::Draft,
            occurred_at: request.occurred_at.unwrap_or(now),
            notes: request.notes,
            movement_id: None,
            created_at: now,
            posted_at: None,
            canceled_at: None,
            lines,
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), InventoryError> {
        self.ensure_cancelable()?;
        self.status = DocumentStatus::Canceled;
        self.canceled_at = Some(now);
        Ok(())
    }
}

impl PostableDocument for InventoryCount {
    fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(DocumentKind::Count, self.id)
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

        let mut draft = MovementDraft::new(self.tenant_id, MovementType::Count, document, self.occurred_at);
        for line in &self.lines {
            let variance = line.variance.ok_or_else(|| {
                InventoryError::validation(format!(
                    "count line {} has no system quantity recorded",
                    line.line_number
                ))
            })?;
            if variance.is_zero() {
                continue;
            }
            draft = draft.line(
                line.item_id,
                line.location_id,
                line.uom.clone(),
                variance,
                Some(
                    line.reason_code
                        .clone()
                        .unwrap_or_else(|| DEFAULT_COUNT_REASON.to_string()),
                ),
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
