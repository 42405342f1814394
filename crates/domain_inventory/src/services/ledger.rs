//! Movement posting
//!
//! These functions run inside a caller's unit of work. Nothing they write
//! is visible until the caller commits, and an error leaves the unit of
//! work to be dropped, which discards the movement together with every
//! snapshot change already applied.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::balance::BalanceDelta;
use crate::document::PostableDocument;
use crate::error::InventoryResult;
use crate::movement::{Movement, MovementDraft};
use crate::ports::InventoryTx;

/// A document together with the movement its posting produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posted<D> {
    pub document: D,
    pub movement: Movement,
}

/// Validates and appends a movement, then projects it onto the snapshot
///
/// Snapshot rows are touched in key order so that two postings sharing
/// keys always lock them in the same sequence.
pub async fn post_movement<T: InventoryTx>(
    tx: &mut T,
    draft: MovementDraft,
    now: DateTime<Utc>,
) -> InventoryResult<Movement> {
    draft.validate()?;
    let movement = draft.into_movement(now);
    tx.insert_movement(&movement).await?;

    for (key, net) in movement.net_by_key() {
        if net.is_zero() {
            continue;
        }
        let snapshot = tx
            .apply_balance_delta(movement.tenant_id, &key, BalanceDelta::on_hand(net), now)
            .await?;
        snapshot.ensure_non_negative()?;
        debug!(key = %key, delta = %net, on_hand = %snapshot.on_hand, "Projected movement line");
    }

    debug!(
        movement_id = %movement.id,
        movement_type = movement.movement_type.as_str(),
        lines = movement.lines.len(),
        "Movement appended"
    );
    Ok(movement)
}

/// Posts a locked draft document and links it to its movement
pub async fn post_document<T, D>(tx: &mut T, document: &mut D, now: DateTime<Utc>) -> InventoryResult<Movement>
where
    T: InventoryTx,
    D: PostableDocument + Send,
{
    document.ensure_postable()?;
    let draft = document.movement_draft()?;
    let movement = post_movement(tx, draft, now).await?;
    document.mark_posted(movement.id, now);
    Ok(movement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryInventoryStore;
    use crate::balance::BalanceKey;
    use crate::error::InventoryError;
    use crate::movement::{DocumentKind, DocumentRef, MovementType};
    use crate::ports::InventoryStore;
    use core_kernel::{ItemId, LocationId, Quantity, TenantId};
    use uuid::Uuid;

    fn draft(tenant_id: TenantId, key: &BalanceKey, quantity: i64) -> MovementDraft {
        MovementDraft::new(
            tenant_id,
            MovementType::Adjustment,
            DocumentRef::new(DocumentKind::Adjustment, Uuid::new_v4()),
            Utc::now(),
        )
        .line(key.item_id, key.location_id, key.uom.clone(), Quantity::from_i64(quantity), None)
    }

    #[tokio::test]
    async fn test_posting_projects_onto_snapshot() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = TenantId::new();
        let key = BalanceKey::new(ItemId::new(), LocationId::new(), "ea");

        let mut tx = store.begin().await.unwrap();
        post_movement(&mut tx, draft(tenant_id, &key, 100), Utc::now()).await.unwrap();
        post_movement(&mut tx, draft(tenant_id, &key, -30), Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let snapshot = store.balance_snapshot(tenant_id, &key).await.unwrap().unwrap();
        assert_eq!(snapshot.on_hand, Quantity::from_i64(70));
    }

    #[tokio::test]
    async fn test_negative_projection_is_refused() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = TenantId::new();
        let key = BalanceKey::new(ItemId::new(), LocationId::new(), "ea");

        let mut tx = store.begin().await.unwrap();
        let err = post_movement(&mut tx, draft(tenant_id, &key, -1), Utc::now()).await.unwrap_err();
        assert!(matches!(err, InventoryError::NegativeBalance { .. }));
        drop(tx);

        assert!(store.movements(tenant_id).await.is_empty());
        assert!(store.balance_snapshot(tenant_id, &key).await.unwrap().is_none());
    }
}
