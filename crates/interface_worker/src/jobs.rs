//! The worker's scheduled jobs

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use core_kernel::Clock;
use domain_inventory::{
    BalanceReconciler, IdempotencyCoordinator, InventoryResult, InventoryStore, ReconcileOptions,
    ReservationService,
};

use crate::config::WorkerConfig;
use crate::scheduler::{JobOutcome, JobScheduler, ScheduledJob};

pub const RECONCILIATION_JOB: &str = "balance-reconciliation";
pub const RESERVATION_EXPIRY_JOB: &str = "reservation-expiry";
pub const IDEMPOTENCY_CLEANUP_JOB: &str = "idempotency-cleanup";

/// Reconciles every tenant in the configured mode
pub struct ReconciliationJob<S: InventoryStore> {
    reconciler: BalanceReconciler<S>,
    options: ReconcileOptions,
    interval: Duration,
}

impl<S: InventoryStore> ReconciliationJob<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, options: ReconcileOptions, interval: Duration) -> Self {
        Self {
            reconciler: BalanceReconciler::new(store, clock),
            options,
            interval,
        }
    }
}

#[async_trait]
impl<S: InventoryStore> ScheduledJob for ReconciliationJob<S> {
    fn name(&self) -> &str {
        RECONCILIATION_JOB
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    #[instrument(skip(self), fields(mode = %self.options.mode))]
    async fn run(&self) -> InventoryResult<JobOutcome> {
        let results = self.reconciler.reconcile_all(&self.options).await?;

        let mut outcome = JobOutcome::default();
        let mut drifted = 0usize;
        for (_, result) in &results {
            match result {
                Ok(report) => {
                    outcome.processed += 1;
                    drifted += report.remaining_count;
                }
                Err(_) => outcome.failed += 1,
            }
        }

        if drifted > 0 {
            warn!(tenants = results.len(), remaining = drifted, "Balance drift remains after sweep");
        } else {
            info!(tenants = results.len(), "Balances consistent");
        }
        Ok(outcome)
    }
}

/// Expires reservations past their expiry time
pub struct ReservationExpiryJob<S: InventoryStore> {
    reservations: ReservationService<S>,
    batch_size: usize,
    interval: Duration,
}

impl<S: InventoryStore> ReservationExpiryJob<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, batch_size: usize, interval: Duration) -> Self {
        Self {
            reservations: ReservationService::new(store, clock),
            batch_size,
            interval,
        }
    }
}

#[async_trait]
impl<S: InventoryStore> ScheduledJob for ReservationExpiryJob<S> {
    fn name(&self) -> &str {
        RESERVATION_EXPIRY_JOB
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> InventoryResult<JobOutcome> {
        let expired = self.reservations.expire_reservations(self.batch_size).await?;
        Ok(JobOutcome {
            processed: expired as u64,
            failed: 0,
        })
    }
}

/// Fails idempotency keys stuck in progress past the TTL
pub struct IdempotencyCleanupJob<S: InventoryStore> {
    coordinator: IdempotencyCoordinator<S>,
    ttl: chrono::Duration,
    interval: Duration,
}

impl<S: InventoryStore> IdempotencyCleanupJob<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, ttl: chrono::Duration, interval: Duration) -> Self {
        Self {
            coordinator: IdempotencyCoordinator::new(store, clock),
            ttl,
            interval,
        }
    }
}

#[async_trait]
impl<S: InventoryStore> ScheduledJob for IdempotencyCleanupJob<S> {
    fn name(&self) -> &str {
        IDEMPOTENCY_CLEANUP_JOB
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> InventoryResult<JobOutcome> {
        let expired = self.coordinator.expire_stale(self.ttl).await?;
        Ok(JobOutcome {
            processed: expired,
            failed: 0,
        })
    }
}

/// Registers the three worker jobs against one store
pub fn build_scheduler<S: InventoryStore>(
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: &WorkerConfig,
) -> anyhow::Result<JobScheduler> {
    let options = config.reconcile_options(None, "scheduled-reconciler")?;

    let mut scheduler = JobScheduler::new();
    scheduler.register(ReconciliationJob::new(
        store.clone(),
        clock.clone(),
        options,
        config.reconcile_interval(),
    ))?;
    scheduler.register(ReservationExpiryJob::new(
        store.clone(),
        clock.clone(),
        config.reservation_expiry_batch,
        config.reservation_expiry_interval(),
    ))?;
    scheduler.register(IdempotencyCleanupJob::new(
        store,
        clock,
        config.idempotency_ttl(),
        config.idempotency_cleanup_interval(),
    ))?;
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_kernel::{FixedClock, ItemId, LocationId, Quantity, TenantId};
    use domain_inventory::{
        AdjustmentService, BalanceKey, InMemoryInventoryStore, NewAdjustment, NewAdjustmentLine, NewReservation,
        ReconcileMode, ReservationStatus,
    };

    struct Fixture {
        store: Arc<InMemoryInventoryStore>,
        clock: FixedClock,
        shared: Arc<dyn Clock>,
        tenant: TenantId,
        key: BalanceKey,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = FixedClock::at(Utc::now());
            Self {
                store: Arc::new(InMemoryInventoryStore::new()),
                shared: Arc::new(clock.clone()),
                clock,
                tenant: TenantId::new(),
                key: BalanceKey::new(ItemId::new(), LocationId::new(), "ea"),
            }
        }

        async fn stock(&self, quantity: i64) {
            let adjustments = AdjustmentService::new(self.store.clone(), self.shared.clone());
            let draft = adjustments
                .create_adjustment(
                    self.tenant,
                    NewAdjustment {
                        occurred_at: None,
                        reason: Some("opening".into()),
                        notes: None,
                        external_ref: None,
                        lines: vec![NewAdjustmentLine {
                            item_id: self.key.item_id,
                            location_id: self.key.location_id,
                            uom: self.key.uom.clone(),
                            quantity_delta: Quantity::from_i64(quantity),
                            reason_code: None,
                        }],
                    },
                )
                .await
                .unwrap();
            adjustments.post_adjustment(self.tenant, draft.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_reconciliation_job_repairs_drift() {
        let f = Fixture::new();
        f.stock(10).await;
        let mut drifted = f.store.balance_snapshot(f.tenant, &f.key).await.unwrap().unwrap();
        drifted.on_hand = Quantity::from_i64(7);
        f.store.overwrite_balance(drifted).await;

        let options = ReconcileOptions {
            mode: ReconcileMode::Repair,
            ..ReconcileOptions::default()
        };
        let job = ReconciliationJob::new(f.store.clone(), f.shared.clone(), options, Duration::from_secs(60));

        let outcome = job.run().await.unwrap();
        assert_eq!(outcome, JobOutcome { processed: 1, failed: 0 });

        let repaired = f.store.balance_snapshot(f.tenant, &f.key).await.unwrap().unwrap();
        assert_eq!(repaired.on_hand, Quantity::from_i64(10));
        assert_eq!(f.store.repairs(f.tenant).await.len(), 1);
    }

    #[tokio::test]
    async fn test_strict_reconciliation_counts_failing_tenants() {
        let f = Fixture::new();
        f.stock(4).await;
        let mut drifted = f.store.balance_snapshot(f.tenant, &f.key).await.unwrap().unwrap();
        drifted.on_hand = Quantity::from_i64(5);
        f.store.overwrite_balance(drifted).await;

        let options = ReconcileOptions {
            mode: ReconcileMode::Strict,
            ..ReconcileOptions::default()
        };
        let job = ReconciliationJob::new(f.store.clone(), f.shared.clone(), options, Duration::from_secs(60));

        let outcome = job.run().await.unwrap();
        assert_eq!(outcome, JobOutcome { processed: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_strict_repair_config_heals_drift_before_checking() {
        let f = Fixture::new();
        f.stock(4).await;
        let mut drifted = f.store.balance_snapshot(f.tenant, &f.key).await.unwrap().unwrap();
        drifted.on_hand = Quantity::from_i64(5);
        f.store.overwrite_balance(drifted).await;

        let config = WorkerConfig {
            reconcile_mode: ReconcileMode::Strict,
            strict_repair: true,
            ..WorkerConfig::default()
        };
        let options = config.reconcile_options(None, "scheduled-reconciler").unwrap();
        let job = ReconciliationJob::new(f.store.clone(), f.shared.clone(), options, Duration::from_secs(60));

        let outcome = job.run().await.unwrap();
        assert_eq!(outcome, JobOutcome { processed: 1, failed: 0 });

        let repaired = f.store.balance_snapshot(f.tenant, &f.key).await.unwrap().unwrap();
        assert_eq!(repaired.on_hand, Quantity::from_i64(4));
    }

    #[tokio::test]
    async fn test_reservation_expiry_job_expires_due_holds() {
        let f = Fixture::new();
        f.stock(10).await;
        let reservations = ReservationService::new(f.store.clone(), f.shared.clone());
        let reservation = reservations
            .create_reservation(
                f.tenant,
                NewReservation {
                    item_id: f.key.item_id,
                    location_id: f.key.location_id,
                    uom: f.key.uom.clone(),
                    quantity: Quantity::from_i64(3),
                    demand_ref: "SO-1".into(),
                    expires_at: Some(f.clock.now() + chrono::Duration::minutes(5)),
                },
            )
            .await
            .unwrap();

        let job = ReservationExpiryJob::new(f.store.clone(), f.shared.clone(), 100, Duration::from_secs(60));
        assert_eq!(job.run().await.unwrap().processed, 0);

        f.clock.advance(chrono::Duration::minutes(6));
        assert_eq!(job.run().await.unwrap().processed, 1);

        let expired = reservations.get_reservation(f.tenant, reservation.id).await.unwrap();
        assert_eq!(expired.status, ReservationStatus::Expired);
    }

    #[tokio::test]
    async fn test_idempotency_cleanup_job_fails_stuck_keys() {
        let f = Fixture::new();
        let coordinator = IdempotencyCoordinator::new(f.store.clone(), f.shared.clone());
        let begin = coordinator.begin(f.tenant, "stuck", "hash").await.unwrap();
        assert!(begin.is_new);

        let job = IdempotencyCleanupJob::new(
            f.store.clone(),
            f.shared.clone(),
            chrono::Duration::minutes(15),
            Duration::from_secs(60),
        );
        assert_eq!(job.run().await.unwrap().processed, 0);

        f.clock.advance(chrono::Duration::minutes(16));
        assert_eq!(job.run().await.unwrap().processed, 1);

        // The same fingerprint may now retry.
        assert!(coordinator.begin(f.tenant, "stuck", "hash").await.unwrap().is_new);
    }

    #[tokio::test]
    async fn test_build_scheduler_registers_every_job() {
        let f = Fixture::new();
        let scheduler = build_scheduler(f.store.clone(), f.shared.clone(), &WorkerConfig::default()).unwrap();

        assert_eq!(
            scheduler.job_names(),
            vec![
                RECONCILIATION_JOB.to_string(),
                IDEMPOTENCY_CLEANUP_JOB.to_string(),
                RESERVATION_EXPIRY_JOB.to_string(),
            ]
        );
        let outcome = scheduler.trigger(RECONCILIATION_JOB).await.unwrap();
        assert_eq!(outcome, JobOutcome::default());
    }
}
