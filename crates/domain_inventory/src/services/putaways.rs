//! Putaway planning and posting
//!
//! Receipt lines are always locked in id order, both when planning and
//! when posting, so two putaways drawing on overlapping lines serialize
//! instead of deadlocking.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use core_kernel::{Clock, PutawayId, Quantity, ReceiptLineId, TenantId};

use crate::availability::availability;
use crate::document::PostableDocument;
use crate::error::{InventoryError, InventoryResult};
use crate::ports::{InventoryStore, InventoryTx};
use crate::putaway::{NewPutaway, Putaway, PutawayLine};
use crate::receipt::ReceiptLineContext;
use crate::services::ledger::{post_document, Posted};

pub struct PutawayService<S: InventoryStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: InventoryStore> PutawayService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Plans a putaway, reserving pending capacity on each receipt line
    ///
    /// The quantities requested for one receipt line are summed across the
    /// whole request before they are checked against availability.
    ///
    /// # Errors
    ///
    /// - `UOM_MISMATCH`, `SAME_LOCATION` for malformed lines
    /// - `NOT_ELIGIBLE` when a line's receipt is voided or belongs to
    ///   another receipt than the one named on the request
    /// - `QC_BLOCKED` while QC holds are unresolved
    /// - `QUANTITY_EXCEEDED` when the request is larger than what is left
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn create_putaway(&self, tenant_id: TenantId, request: NewPutaway) -> InventoryResult<Putaway> {
        request.validate()?;
        let now = self.clock.now();
        let requested = request.requested_by_receipt_line();

        let mut tx = self.store.begin().await?;
        let mut contexts: BTreeMap<ReceiptLineId, ReceiptLineContext> = BTreeMap::new();
        for &receipt_line_id in requested.keys() {
            let context = lock_receipt_line(&mut tx, tenant_id, receipt_line_id).await?;
            if let Some(receipt_id) = request.receipt_id {
                if context.receipt_id != receipt_id {
                    return Err(InventoryError::not_eligible(format!(
                        "receipt line {} does not belong to receipt {}",
                        receipt_line_id, receipt_id
                    )));
                }
            }
            contexts.insert(receipt_line_id, context);
        }

        let mut lines = Vec::with_capacity(request.lines.len());
        for (index, line) in request.lines.iter().enumerate() {
            let context = contexts
                .get(&line.receipt_line_id)
                .ok_or_else(|| InventoryError::not_found("ReceiptLine", line.receipt_line_id))?;
            lines.push(PutawayLine::plan((index + 1) as u32, context, line)?);
        }

        for (receipt_line_id, quantity) in &requested {
            let context = contexts
                .get(receipt_line_id)
                .ok_or_else(|| InventoryError::not_found("ReceiptLine", receipt_line_id))?;
            let qc = tx.qc_totals(tenant_id, *receipt_line_id).await?;
            let totals = tx.putaway_totals(tenant_id, *receipt_line_id).await?;
            let available = availability(context.availability_context(), qc, totals, Quantity::zero());
            debug!(
                receipt_line_id = %receipt_line_id,
                requested = %quantity,
                available = %available.available_for_planning,
                "Checked planning availability"
            );
            available.check_planning(*quantity)?;
        }

        let putaway = Putaway::draft(tenant_id, request.receipt_id, request.notes, lines, now);
        tx.insert_putaway(&putaway).await?;
        tx.commit().await?;

        info!(putaway_id = %putaway.id, "Putaway planned");
        Ok(putaway)
    }

    /// Posts the pending lines of a putaway as a transfer
    ///
    /// Availability is evaluated again with fresh QC and putaway totals
    /// under the receipt-line locks. The putaway's own pending quantity is
    /// excluded from the pending total, and the request must also fit what
    /// remains after other putaways already posted.
    #[instrument(skip(self))]
    pub async fn post_putaway(&self, tenant_id: TenantId, id: PutawayId) -> InventoryResult<Posted<Putaway>> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut putaway = tx
            .lock_putaway(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Putaway", id))?;
        putaway.ensure_postable()?;

        for (receipt_line_id, quantity) in putaway.pending_by_receipt_line() {
            let context = lock_receipt_line(&mut tx, tenant_id, receipt_line_id).await?;
            let qc = tx.qc_totals(tenant_id, receipt_line_id).await?;
            let totals = tx.putaway_totals(tenant_id, receipt_line_id).await?;
            availability(context.availability_context(), qc, totals, quantity).check_posting(quantity)?;
        }

        let movement = post_document(&mut tx, &mut putaway, now).await?;
        tx.update_putaway(&putaway).await?;
        tx.commit().await?;

        info!(putaway_id = %id, movement_id = %movement.id, "Putaway posted");
        Ok(Posted {
            document: putaway,
            movement,
        })
    }

    /// Cancels a draft putaway and releases its pending capacity
    #[instrument(skip(self))]
    pub async fn cancel_putaway(&self, tenant_id: TenantId, id: PutawayId) -> InventoryResult<Putaway> {
        let mut tx = self.store.begin().await?;
        let mut putaway = tx
            .lock_putaway(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Putaway", id))?;

        putaway.cancel(self.clock.now())?;
        tx.update_putaway(&putaway).await?;
        tx.commit().await?;

        info!(putaway_id = %id, "Putaway canceled");
        Ok(putaway)
    }

    pub async fn get_putaway(&self, tenant_id: TenantId, id: PutawayId) -> InventoryResult<Putaway> {
        self.store
            .find_putaway(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Putaway", id))
    }
}

async fn lock_receipt_line<T: InventoryTx>(
    tx: &mut T,
    tenant_id: TenantId,
    receipt_line_id: ReceiptLineId,
) -> InventoryResult<ReceiptLineContext> {
    let context = tx
        .lock_receipt_line(tenant_id, receipt_line_id)
        .await?
        .ok_or_else(|| InventoryError::not_found("ReceiptLine", receipt_line_id))?;
    context.ensure_active()?;
    Ok(context)
}
