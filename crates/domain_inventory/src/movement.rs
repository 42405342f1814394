//! Movements: the append-only ledger records
//!
//! A `Movement` is created exactly once per successful posting and never
//! edited afterwards. Corrections are new movements. Each line carries a
//! signed delta for one (item, location, uom) key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use core_kernel::{ItemId, LocationId, MovementId, MovementLineId, Quantity, TenantId};

use crate::balance::BalanceKey;
use crate::error::InventoryError;

/// Kind of quantity change recorded by a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Adjustment,
    Count,
    Transfer,
    ReceiptDerived,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Adjustment => "adjustment",
            MovementType::Count => "count",
            MovementType::Transfer => "transfer",
            MovementType::ReceiptDerived => "receipt_derived",
        }
    }
}

impl FromStr for MovementType {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adjustment" => Ok(MovementType::Adjustment),
            "count" => Ok(MovementType::Count),
            "transfer" => Ok(MovementType::Transfer),
            "receipt_derived" => Ok(MovementType::ReceiptDerived),
            other => Err(InventoryError::validation(format!("unknown movement type '{}'", other))),
        }
    }
}

/// Drafts never become movements, so a stored movement is always posted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementStatus {
    Posted,
}

/// The kind of document a movement was posted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Adjustment,
    Count,
    Putaway,
    Receipt,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Adjustment => "adjustment",
            DocumentKind::Count => "count",
            DocumentKind::Putaway => "putaway",
            DocumentKind::Receipt => "receipt",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adjustment" => Ok(DocumentKind::Adjustment),
            "count" => Ok(DocumentKind::Count),
            "putaway" => Ok(DocumentKind::Putaway),
            "receipt" => Ok(DocumentKind::Receipt),
            other => Err(InventoryError::validation(format!("unknown document kind '{}'", other))),
        }
    }
}

/// Reference to the source document of a posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub kind: DocumentKind,
    pub id: Uuid,
}

impl DocumentRef {
    pub fn new(kind: DocumentKind, id: impl Into<Uuid>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.id)
    }
}

/// A line of a posted movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLine {
    pub id: MovementLineId,
    pub line_number: u32,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub uom: String,
    pub quantity_delta: Quantity,
    pub reason_code: Option<String>,
}

impl MovementLine {
    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.item_id, self.location_id, self.uom.clone())
    }
}

/// A posted, immutable quantity change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub movement_type: MovementType,
    pub status: MovementStatus,
    pub source: DocumentRef,
    pub external_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub posted_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
    pub lines: Vec<MovementLine>,
}

impl Movement {
    /// Net delta per balance key across all lines
    pub fn net_by_key(&self) -> BTreeMap<BalanceKey, Quantity> {
        let mut totals: BTreeMap<BalanceKey, Quantity> = BTreeMap::new();
        for line in &self.lines {
            *totals.entry(line.key()).or_default() += line.quantity_delta;
        }
        totals
    }
}

/// A line waiting to be posted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovementLine {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub uom: String,
    pub quantity_delta: Quantity,
    pub reason_code: Option<String>,
}

/// Everything needed to write a movement, minus the ids and posting time
#[derive(Debug, Clone)]
pub struct MovementDraft {
    pub tenant_id: TenantId,
    pub movement_type: MovementType,
    pub source: DocumentRef,
    pub external_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
    pub lines: Vec<NewMovementLine>,
}

impl MovementDraft {
    pub fn new(
        tenant_id: TenantId,
        movement_type: MovementType,
        source: DocumentRef,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            movement_type,
            source,
            external_ref: None,
            occurred_at,
            idempotency_key: None,
            lines: Vec::new(),
        }
    }

    pub fn with_external_ref(mut self, external_ref: Option<String>) -> Self {
        self.external_ref = external_ref;
        self
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Appends a line
    pub fn line(
        mut self,
        item_id: ItemId,
        location_id: LocationId,
        uom: impl Into<String>,
        quantity_delta: Quantity,
        reason_code: Option<String>,
    ) -> Self {
        self.lines.push(NewMovementLine {
            item_id,
            location_id,
            uom: uom.into(),
            quantity_delta,
            reason_code,
        });
        self
    }

    /// Checks the structural rules every movement must satisfy
    ///
    /// A count whose lines all matched the ledger still posts, as a header
    /// with no lines, so the count is linked to a movement like any other
    /// posted document.
    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.lines.is_empty() && self.movement_type != MovementType::Count {
            return Err(InventoryError::NoLines { document: self.source });
        }
        for (index, line) in self.lines.iter().enumerate() {
            if line.uom.trim().is_empty() {
                return Err(InventoryError::validation(format!(
                    "movement line {} has an empty unit of measure",
                    index + 1
                )));
            }
            if line.quantity_delta.is_zero() {
                return Err(InventoryError::LineZero {
                    document: self.source,
                    line_number: (index + 1) as u32,
                });
            }
        }
        if self.movement_type == MovementType::Transfer {
            ensure_conserved(&self.lines)?;
        }
        Ok(())
    }

    /// Assigns ids and the posting timestamp
    pub fn into_movement(self, posted_at: DateTime<Utc>) -> Movement {
        let lines = self
            .lines
            .into_iter()
            .enumerate()
            .map(|(index, line)| MovementLine {
                id: MovementLineId::new_v7(),
                line_number: (index + 1) as u32,
                item_id: line.item_id,
                location_id: line.location_id,
                uom: line.uom,
                quantity_delta: line.quantity_delta,
                reason_code: line.reason_code,
            })
            .collect();

        Movement {
            id: MovementId::new_v7(),
            tenant_id: self.tenant_id,
            movement_type: self.movement_type,
            status: MovementStatus::Posted,
            source: self.source,
            external_ref: self.external_ref,
            occurred_at: self.occurred_at,
            posted_at,
            idempotency_key: self.idempotency_key,
            lines,
        }
    }
}

/// Transfer lines for each (item, uom) must net to zero
pub fn ensure_conserved(lines: &[NewMovementLine]) -> Result<(), InventoryError> {
    let mut net: BTreeMap<(ItemId, &str), Quantity> = BTreeMap::new();
    for line in lines {
        *net.entry((line.item_id, line.uom.as_str())).or_default() += line.quantity_delta;
    }
    match net.into_iter().find(|(_, total)| !total.is_zero()) {
        Some(((item_id, _), total)) => Err(InventoryError::UnbalancedTransfer { item_id, net: total }),
        None => Ok(()),
    }
}
