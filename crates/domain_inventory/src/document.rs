//! Shared lifecycle of postable documents
//!
//! Adjustments, counts and putaways all move `Draft -> Posted` exactly once,
//! or `Draft -> Canceled`. Once linked to a movement a document can never be
//! posted again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::MovementId;

use crate::error::InventoryError;
use crate::movement::{DocumentRef, MovementDraft};

/// Lifecycle status of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Posted,
    Canceled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Posted => "posted",
            DocumentStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "posted" => Ok(DocumentStatus::Posted),
            "canceled" => Ok(DocumentStatus::Canceled),
            other => Err(InventoryError::validation(format!("unknown document status '{}'", other))),
        }
    }
}

/// A draft document that turns into exactly one movement when posted
pub trait PostableDocument {
    fn document_ref(&self) -> DocumentRef;

    fn status(&self) -> DocumentStatus;

    fn movement_id(&self) -> Option<MovementId>;

    /// Builds the lines to post; fails with the document's posting conflict
    fn movement_draft(&self) -> Result<MovementDraft, InventoryError>;

    /// Records the posting on the document itself
    fn mark_posted(&mut self, movement_id: MovementId, at: DateTime<Utc>);

    /// Fails unless the document is a draft that has never been linked
    fn ensure_postable(&self) -> Result<(), InventoryError> {
        match self.status() {
            DocumentStatus::Posted => Err(InventoryError::AlreadyPosted {
                document: self.document_ref(),
            }),
            DocumentStatus::Canceled => Err(InventoryError::Canceled {
                document: self.document_ref(),
            }),
            DocumentStatus::Draft if self.movement_id().is_some() => Err(InventoryError::AlreadyPosted {
                document: self.document_ref(),
            }),
            DocumentStatus::Draft => Ok(()),
        }
    }

    /// Fails unless the document can still be canceled
    fn ensure_cancelable(&self) -> Result<(), InventoryError> {
        self.ensure_postable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{DocumentKind, MovementType};
    use core_kernel::TenantId;
    use uuid::Uuid;

    struct Probe {
        id: Uuid,
        status: DocumentStatus,
        movement_id: Option<MovementId>,
    }

    impl PostableDocument for Probe {
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
            Ok(MovementDraft::new(
                TenantId::new(),
                MovementType::Adjustment,
                self.document_ref(),
                Utc::now(),
            ))
        }

        fn mark_posted(&mut self, movement_id: MovementId, _at: DateTime<Utc>) {
            self.status = DocumentStatus::Posted;
            self.movement_id = Some(movement_id);
        }
    }

    fn probe(status: DocumentStatus) -> Probe {
        Probe {
            id: Uuid::new_v4(),
            status,
            movement_id: None,
        }
    }

    #[test]
    fn test_draft_is_postable() {
        assert!(probe(DocumentStatus::Draft).ensure_postable().is_ok());
    }

    #[test]
    fn test_posted_and_canceled_are_not() {
        let posted = probe(DocumentStatus::Posted).ensure_postable().unwrap_err();
        assert_eq!(posted.code(), "ALREADY_POSTED");

        let canceled = probe(DocumentStatus::Canceled).ensure_postable().unwrap_err();
        assert_eq!(canceled.code(), "CANCELED");
    }

    #[test]
    fn test_linked_draft_counts_as_posted() {
        let mut document = probe(DocumentStatus::Draft);
        document.movement_id = Some(MovementId::new());
        assert_eq!(document.ensure_postable().unwrap_err().code(), "ALREADY_POSTED");
    }

    #[test]
    fn test_mark_posted_blocks_reposting() {
        let mut document = probe(DocumentStatus::Draft);
        document.mark_posted(MovementId::new(), Utc::now());
        assert!(document.ensure_postable().is_err());
    }
}
