//! Adjustment workflow

use std::sync::Arc;
use tracing::{info, instrument};

use core_kernel::{AdjustmentId, Clock, TenantId};

use crate::adjustment::{Adjustment, NewAdjustment};
use crate::error::{InventoryError, InventoryResult};
use crate::ports::{InventoryStore, InventoryTx};
use crate::services::ledger::{post_document, Posted};

/// Creates, posts and cancels inventory adjustments
pub struct AdjustmentService<S: InventoryStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: InventoryStore> AdjustmentService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Stores a draft adjustment
    ///
    /// Zero-quantity lines are accepted here and rejected when posting, so
    /// a draft can be edited into shape before it hits the ledger.
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn create_adjustment(&self, tenant_id: TenantId, request: NewAdjustment) -> InventoryResult<Adjustment> {
        request.validate()?;
        let adjustment = Adjustment::draft(tenant_id, request, self.clock.now());

        let mut tx = self.store.begin().await?;
        tx.insert_adjustment(&adjustment).await?;
        tx.commit().await?;

        info!(adjustment_id = %adjustment.id, "Adjustment drafted");
        Ok(adjustment)
    }

    /// Posts a draft adjustment as an adjustment movement
    ///
    /// # Errors
    ///
    /// `ALREADY_POSTED`, `CANCELED`, `NO_LINES`, `LINE_ZERO`, or
    /// `NEGATIVE_BALANCE` when an outflow exceeds what is on hand. Nothing is
    /// written on failure.
    #[instrument(skip(self))]
    pub async fn post_adjustment(&self, tenant_id: TenantId, id: AdjustmentId) -> InventoryResult<Posted<Adjustment>> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut adjustment = tx
            .lock_adjustment(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Adjustment", id))?;

        let movement = post_document(&mut tx, &mut adjustment, now).await?;
        tx.update_adjustment(&adjustment).await?;
        tx.commit().await?;

        info!(adjustment_id = %id, movement_id = %movement.id, "Adjustment posted");
        Ok(Posted {
            document: adjustment,
            movement,
        })
    }

    #[instrument(skip(self))]
    pub async fn cancel_adjustment(&self, tenant_id: TenantId, id: AdjustmentId) -> InventoryResult<Adjustment> {
        let mut tx = self.store.begin().await?;
        let mut adjustment = tx
            .lock_adjustment(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Adjustment", id))?;

        adjustment.cancel(self.clock.now())?;
        tx.update_adjustment(&adjustment).await?;
        tx.commit().await?;

        info!(adjustment_id = %id, "Adjustment canceled");
        Ok(adjustment)
    }

    pub async fn get_adjustment(&self, tenant_id: TenantId, id: AdjustmentId) -> InventoryResult<Adjustment> {
        self.store
            .find_adjustment(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Adjustment", id))
    }
}
