//! Physical count workflow

use std::sync::Arc;
use tracing::{debug, info, instrument};

use core_kernel::{Clock, CountId, TenantId};

use crate::count::{InventoryCount, NewCount};
use crate::document::PostableDocument;
use crate::error::{InventoryError, InventoryResult};
use crate::ports::{InventoryStore, InventoryTx};
use crate::services::ledger::{post_document, Posted};

/// Creates, posts and cancels physical counts
pub struct CountService<S: InventoryStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: InventoryStore> CountService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn create_count(&self, tenant_id: TenantId, request: NewCount) -> InventoryResult<InventoryCount> {
        request.validate()?;
        let count = InventoryCount::draft(tenant_id, request, self.clock.now());

        let mut tx = self.store.begin().await?;
        tx.insert_count(&count).await?;
        tx.commit().await?;

        info!(count_id = %count.id, "Count drafted");
        Ok(count)
    }

    /// Posts the variance between counted and ledger quantity
    ///
    /// The ledger on-hand is read inside the posting transaction, recorded
    /// on each line as its system quantity, and only non-zero variances
    /// become movement lines.
    #[instrument(skip(self))]
    pub async fn post_count(&self, tenant_id: TenantId, id: CountId) -> InventoryResult<Posted<InventoryCount>> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut count = tx
            .lock_count(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Count", id))?;
        count.ensure_postable()?;

        for line in count.lines.iter_mut() {
            let on_hand = tx.ledger_on_hand(tenant_id, &line.key()).await?;
            line.record_system_quantity(on_hand);
            debug!(
                line_number = line.line_number,
                counted = %line.counted_quantity,
                system = %on_hand,
                "Captured system quantity"
            );
        }

        let movement = post_document(&mut tx, &mut count, now).await?;
        tx.update_count(&count).await?;
        tx.commit().await?;

        info!(
            count_id = %id,
            movement_id = %movement.id,
            variance_lines = movement.lines.len(),
            "Count posted"
        );
        Ok(Posted {
            document: count,
            movement,
        })
    }

    #[instrument(skip(self))]
    pub async fn cancel_count(&self, tenant_id: TenantId, id: CountId) -> InventoryResult<InventoryCount> {
        let mut tx = self.store.begin().await?;
        let mut count = tx
            .lock_count(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Count", id))?;

        count.cancel(self.clock.now())?;
        tx.update_count(&count).await?;
        tx.commit().await?;

        info!(count_id = %id, "Count canceled");
        Ok(count)
    }

    pub async fn get_count(&self, tenant_id: TenantId, id: CountId) -> InventoryResult<InventoryCount> {
        self.store
            .find_count(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Count", id))
    }
}
