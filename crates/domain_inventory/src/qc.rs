//! Quality-control events against receipt lines
//!
//! The sum of hold, accept and reject quantities recorded against a line
//! may never exceed what was received on it. The check runs when an event
//! is inserted, under a lock on the receipt line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use core_kernel::{QcEventId, Quantity, ReceiptLineId, TenantId};

use crate::error::InventoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcEventType {
    Hold,
    Accept,
    Reject,
}

impl QcEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QcEventType::Hold => "hold",
            QcEventType::Accept => "accept",
            QcEventType::Reject => "reject",
        }
    }
}

impl FromStr for QcEventType {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hold" => Ok(QcEventType::Hold),
            "accept" => Ok(QcEventType::Accept),
            "reject" => Ok(QcEventType::Reject),
            other => Err(InventoryError::validation(format!("unknown QC event type '{}'", other))),
        }
    }
}

/// Request to record a QC outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQcEvent {
    pub receipt_line_id: ReceiptLineId,
    pub event_type: QcEventType,
    pub quantity: Quantity,
    pub actor: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewQcEvent {
    pub fn validate(&self) -> Result<(), InventoryError> {
        if !self.quantity.is_positive() {
            return Err(InventoryError::validation("QC event quantity must be positive"));
        }
        Ok(())
    }
}

/// A recorded QC outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcEvent {
    pub id: QcEventId,
    pub tenant_id: TenantId,
    pub receipt_line_id: ReceiptLineId,
    pub event_type: QcEventType,
    pub quantity: Quantity,
    pub actor: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl QcEvent {
    pub fn record(tenant_id: TenantId, request: NewQcEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: QcEventId::new_v7(),
            tenant_id,
            receipt_line_id: request.receipt_line_id,
            event_type: request.event_type,
            quantity: request.quantity,
            actor: request.actor,
            notes: request.notes,
            occurred_at: request.occurred_at.unwrap_or(now),
            created_at: now,
        }
    }
}

/// Summed QC quantities for one receipt line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcTotals {
    pub hold: Quantity,
    pub accept: Quantity,
    pub reject: Quantity,
}

impl QcTotals {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a QcEvent>) -> Self {
        events.into_iter().fold(Self::default(), |mut totals, event| {
            totals.add(event.event_type, event.quantity);
            totals
        })
    }

    pub fn add(&mut self, event_type: QcEventType, quantity: Quantity) {
        match event_type {
            QcEventType::Hold => self.hold += quantity,
            QcEventType::Accept => self.accept += quantity,
            QcEventType::Reject => self.reject += quantity,
        }
    }

    pub fn total(&self) -> Quantity {
        self.hold + self.accept + self.reject
    }

    /// Checks that one more event keeps the line within its received quantity
    pub fn ensure_can_record(&self, quantity: Quantity, received: Quantity) -> Result<(), InventoryError> {
        let after = self.total() + quantity;
        if after.exceeds(received) {
            return Err(InventoryError::QuantityExceeded {
                requested: quantity,
                available: (received - self.total()).clamp_non_negative(),
            });
        }
        Ok(())
    }
}
