//! Balance reconciler
//!
//! Compares the stored snapshot to ledger truth and, depending on the
//! mode, reports, repairs or fails on drift. Runs are read-mostly and safe
//! alongside live postings: a posting that lands after a repair simply
//! moves the row on from the repaired value, and the next pass re-checks.

use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use core_kernel::{Clock, Quantity, ReconciliationRunId, TenantId};

use crate::error::{InventoryError, InventoryResult};
use crate::ports::InventoryStore;
use crate::reconciliation::{
    find_mismatches, BalanceMismatch, BalanceRepair, ReconcileMode, ReconcileOptions, ReconciliationReport,
    RepairOptions, RepairOutcome,
};

pub struct BalanceReconciler<S: InventoryStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: InventoryStore> BalanceReconciler<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Every key whose snapshot drifts from the ledger by more than `tolerance`
    #[instrument(skip(self))]
    pub async fn compare_balances(&self, tenant_id: TenantId, tolerance: Quantity) -> InventoryResult<Vec<BalanceMismatch>> {
        let ledger = self.store.ledger_totals(tenant_id).await?;
        let reservations = self.store.reservation_totals(tenant_id).await?;
        let snapshots = self.store.balance_snapshots(tenant_id).await?;

        let mismatches = find_mismatches(tenant_id, &ledger, &reservations, &snapshots, tolerance);
        if !mismatches.is_empty() {
            warn!(mismatch_count = mismatches.len(), "Balance drift detected");
        }
        Ok(mismatches)
    }

    /// Overwrites drifted snapshot rows with ledger truth
    ///
    /// At most `max_repair_rows` rows are written; the rest are counted as
    /// skipped. A key whose ledger truth is itself negative cannot be
    /// written to the snapshot and is counted as unrepairable.
    #[instrument(skip(self, mismatches, options), fields(run_id = %options.run_id, candidates = mismatches.len()))]
    pub async fn repair_balances_from_ledger(
        &self,
        tenant_id: TenantId,
        mismatches: &[BalanceMismatch],
        options: &RepairOptions,
    ) -> InventoryResult<RepairOutcome> {
        let mut outcome = RepairOutcome::default();

        for mismatch in mismatches.iter().filter(|m| m.tenant_id == tenant_id) {
            if mismatch.computed_on_hand.is_negative()
                || mismatch.computed_reserved.is_negative()
                || mismatch.computed_allocated.is_negative()
            {
                error!(
                    key = %mismatch.key,
                    on_hand = %mismatch.computed_on_hand,
                    reserved = %mismatch.computed_reserved,
                    "Ledger truth is negative; snapshot left unchanged"
                );
                outcome.unrepairable_count += 1;
                continue;
            }
            if options.max_repair_rows.is_some_and(|cap| outcome.repaired_count >= cap) {
                outcome.skipped_count += 1;
                continue;
            }

            let now = self.clock.now();
            let snapshot = mismatch.repaired_snapshot(now);
            let repair = BalanceRepair::for_mismatch(mismatch, options.run_id, &options.actor, now);
            self.store.repair_balance(&snapshot, &repair).await?;
            outcome.repaired_count += 1;
        }

        if outcome.skipped_count > 0 {
            warn!(skipped = outcome.skipped_count, "Repair cap reached; remaining drift left for review");
        }
        info!(
            repaired = outcome.repaired_count,
            unrepairable = outcome.unrepairable_count,
            "Balance repair finished"
        );
        Ok(outcome)
    }

    /// One reconciliation pass in the requested mode
    ///
    /// # Errors
    ///
    /// In strict mode, `RECONCILIATION_FAILED` with the number of
    /// mismatches still present at the end of the pass.
    #[instrument(skip(self, options), fields(mode = %options.mode))]
    pub async fn reconcile(&self, tenant_id: TenantId, options: &ReconcileOptions) -> InventoryResult<ReconciliationReport> {
        let run_id = ReconciliationRunId::new_v7();
        let started_at = self.clock.now();

        let mismatches = self.compare_balances(tenant_id, options.tolerance).await?;
        let mismatch_count = mismatches.len();
        let mut remaining_count = mismatch_count;

        let should_repair = match options.mode {
            ReconcileMode::Report => false,
            ReconcileMode::Repair => true,
            ReconcileMode::Strict => options.repair_before_strict,
        };

        let mut repair = None;
        if should_repair {
            let repair_options = RepairOptions {
                run_id,
                actor: options.actor.clone(),
                max_repair_rows: options.max_repair_rows,
            };
            let outcome = self
                .repair_balances_from_ledger(tenant_id, &mismatches, &repair_options)
                .await?;
            if outcome.repaired_count > 0 {
                remaining_count = self.compare_balances(tenant_id, options.tolerance).await?.len();
            }
            repair = Some(outcome);
        }

        if options.mode == ReconcileMode::Strict && remaining_count > 0 {
            error!(remaining = remaining_count, "Strict reconciliation failed");
            return Err(InventoryError::ReconciliationFailed {
                tenant_id,
                mismatch_count: remaining_count,
            });
        }

        let report = ReconciliationReport {
            run_id,
            tenant_id,
            mode: options.mode,
            mismatch_count,
            mismatches: mismatches.into_iter().take(options.max_reported).collect(),
            repair,
            remaining_count,
            started_at,
            finished_at: self.clock.now(),
        };
        info!(
            run_id = %run_id,
            found = report.mismatch_count,
            remaining = report.remaining_count,
            "Reconciliation pass complete"
        );
        Ok(report)
    }

    /// Runs `reconcile` for every tenant with ledger, reservation or snapshot rows
    ///
    /// A failing tenant does not stop the sweep; its error is returned in
    /// its slot.
    pub async fn reconcile_all(
        &self,
        options: &ReconcileOptions,
    ) -> InventoryResult<Vec<(TenantId, InventoryResult<ReconciliationReport>)>> {
        let tenants = self.store.list_tenants().await?;
        let mut results = Vec::with_capacity(tenants.len());
        for tenant_id in tenants {
            let result = self.reconcile(tenant_id, options).await;
            if let Err(err) = &result {
                error!(tenant_id = %tenant_id, error = %err, "Reconciliation failed for tenant");
            }
            results.push((tenant_id, result));
        }
        Ok(results)
    }

    /// Seeds the snapshot from the ledger: an uncapped, zero-tolerance repair pass
    #[instrument(skip(self))]
    pub async fn bootstrap_balances(&self, tenant_id: TenantId, actor: &str) -> InventoryResult<ReconciliationReport> {
        let options = ReconcileOptions {
            mode: ReconcileMode::Repair,
            tolerance: Quantity::zero(),
            max_repair_rows: None,
            actor: actor.to_string(),
            ..ReconcileOptions::default()
        };
        self.reconcile(tenant_id, &options).await
    }
}
