//! Receiving: receipts, voids and QC events

use std::sync::Arc;
use tracing::{info, instrument, warn};

use core_kernel::{Clock, Quantity, ReceiptId, ReceiptLineId, TenantId};

use crate::availability::{availability, Availability};
use crate::error::{InventoryError, InventoryResult};
use crate::idempotency::{request_hash, IdempotencyStatus, ResponseRef};
use crate::ports::{InventoryStore, InventoryTx};
use crate::qc::{NewQcEvent, QcEvent};
use crate::receipt::{NewReceipt, Receipt};
use crate::services::idempotency::IdempotencyCoordinator;
use crate::services::ledger::post_movement;

/// Response kind stored against idempotency keys used to create receipts
pub const RECEIPT_RESPONSE_KIND: &str = "receipt";

pub struct ReceivingService<S: InventoryStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    idempotency: IdempotencyCoordinator<S>,
}

impl<S: InventoryStore> ReceivingService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        let idempotency = IdempotencyCoordinator::new(store.clone(), clock.clone());
        Self {
            store,
            clock,
            idempotency,
        }
    }

    /// Receives goods into staging
    ///
    /// With an idempotency key, a repeat of a completed request returns the
    /// receipt the first call created instead of receiving twice.
    ///
    /// # Errors
    ///
    /// - `IDEMPOTENCY_IN_PROGRESS` while the original request is running
    /// - `IDEMPOTENCY_HASH_MISMATCH` when the key was used for another payload
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn create_receipt(
        &self,
        tenant_id: TenantId,
        request: NewReceipt,
        idempotency_key: Option<String>,
    ) -> InventoryResult<Receipt> {
        request.validate()?;
        let Some(key) = idempotency_key else {
            return self.receive(tenant_id, request, None).await;
        };

        let hash = request_hash(&request)?;
        let begin = self.idempotency.begin(tenant_id, &key, &hash).await?;
        if let Some(reference) = begin.replay() {
            let receipt = self.get_receipt(tenant_id, ReceiptId::from_uuid(reference.id)).await?;
            info!(receipt_id = %receipt.id, key = %key, "Replayed receipt for idempotency key");
            return Ok(receipt);
        }
        begin.ensure_not_in_flight()?;
        if !begin.is_new {
            return Err(InventoryError::IdempotencyInProgress { key });
        }

        // A reclaimed key may belong to a request that did commit its receipt
        // before the stale-key sweep failed the record.
        if let Some(receipt) = self.store.find_receipt_by_idempotency_key(tenant_id, &key).await? {
            self.complete_succeeded(tenant_id, &key, &receipt).await?;
            info!(receipt_id = %receipt.id, key = %key, "Replayed receipt stored under reclaimed key");
            return Ok(receipt);
        }

        match self.receive(tenant_id, request, Some(key.clone())).await {
            Ok(receipt) => {
                self.complete_succeeded(tenant_id, &key, &receipt).await?;
                Ok(receipt)
            }
            Err(err) => {
                if let Err(complete_err) = self
                    .idempotency
                    .complete(tenant_id, &key, IdempotencyStatus::Failed, None)
                    .await
                {
                    warn!(error = %complete_err, key = %key, "Could not mark idempotency key failed");
                }
                Err(err)
            }
        }
    }

    async fn complete_succeeded(&self, tenant_id: TenantId, key: &str, receipt: &Receipt) -> InventoryResult<()> {
        let reference = ResponseRef::new(RECEIPT_RESPONSE_KIND, receipt.id);
        let completed = self
            .idempotency
            .complete(tenant_id, key, IdempotencyStatus::Succeeded, Some(reference))
            .await?;
        if !completed {
            warn!(
                receipt_id = %receipt.id,
                key = %key,
                "Receipt committed after its idempotency key expired; retries replay it by key"
            );
        }
        Ok(())
    }

    async fn receive(
        &self,
        tenant_id: TenantId,
        request: NewReceipt,
        idempotency_key: Option<String>,
    ) -> InventoryResult<Receipt> {
        let now = self.clock.now();
        let mut receipt = Receipt::receive(tenant_id, request, idempotency_key, now);

        let mut tx = self.store.begin().await?;
        let movement = post_movement(&mut tx, receipt.receipt_movement_draft(), now).await?;
        receipt.mark_posted(movement.id);
        tx.insert_receipt(&receipt).await?;
        tx.commit().await?;

        info!(
            receipt_id = %receipt.id,
            movement_id = %movement.id,
            lines = receipt.lines.len(),
            "Receipt posted"
        );
        Ok(receipt)
    }

    /// Reverses a receipt with a compensating movement
    ///
    /// # Errors
    ///
    /// `CANCELED` when already voided, `NOT_ELIGIBLE` while putaway lines
    /// still draw on the receipt.
    #[instrument(skip(self, reason))]
    pub async fn void_receipt(
        &self,
        tenant_id: TenantId,
        receipt_id: ReceiptId,
        reason: Option<String>,
    ) -> InventoryResult<Receipt> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut receipt = tx
            .lock_receipt(tenant_id, receipt_id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Receipt", receipt_id))?;
        receipt.ensure_voidable()?;

        let active = tx.count_active_putaway_lines(tenant_id, receipt_id).await?;
        if active > 0 {
            return Err(InventoryError::not_eligible(format!(
                "receipt {} has {} pending or completed putaway lines",
                receipt_id, active
            )));
        }

        let movement = post_movement(&mut tx, receipt.void_movement_draft(), now).await?;
        receipt.void(movement.id, reason, now)?;
        tx.update_receipt(&receipt).await?;
        tx.commit().await?;

        info!(receipt_id = %receipt_id, movement_id = %movement.id, "Receipt voided");
        Ok(receipt)
    }

    /// Records a QC outcome against a receipt line
    #[instrument(skip(self, request), fields(receipt_line_id = %request.receipt_line_id))]
    pub async fn record_qc_event(&self, tenant_id: TenantId, request: NewQcEvent) -> InventoryResult<QcEvent> {
        request.validate()?;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let line = tx
            .lock_receipt_line(tenant_id, request.receipt_line_id)
            .await?
            .ok_or_else(|| InventoryError::not_found("ReceiptLine", request.receipt_line_id))?;
        line.ensure_active()?;

        let totals = tx.qc_totals(tenant_id, line.line.id).await?;
        totals.ensure_can_record(request.quantity, line.line.quantity_received)?;

        let event = QcEvent::record(tenant_id, request, now);
        tx.insert_qc_event(&event).await?;
        tx.commit().await?;

        info!(
            qc_event_id = %event.id,
            event_type = event.event_type.as_str(),
            quantity = %event.quantity,
            "QC event recorded"
        );
        Ok(event)
    }

    /// Current putaway availability of a receipt line
    pub async fn receipt_line_availability(
        &self,
        tenant_id: TenantId,
        receipt_line_id: ReceiptLineId,
    ) -> InventoryResult<Availability> {
        let line = self
            .store
            .find_receipt_line(tenant_id, receipt_line_id)
            .await?
            .ok_or_else(|| InventoryError::not_found("ReceiptLine", receipt_line_id))?;
        let qc = self.store.receipt_line_qc_totals(tenant_id, receipt_line_id).await?;
        let totals = self.store.receipt_line_putaway_totals(tenant_id, receipt_line_id).await?;
        Ok(availability(line.availability_context(), qc, totals, Quantity::zero()))
    }

    pub async fn get_receipt(&self, tenant_id: TenantId, id: ReceiptId) -> InventoryResult<Receipt> {
        self.store
            .find_receipt(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Receipt", id))
    }
}
