//! PostgreSQL Inventory Adapter
//!
//! Implements the `InventoryStore` / `InventoryTx` ports from
//! `domain_inventory` on top of the repositories in this crate.
//!
//! # Overview
//!
//! - `PostgresInventoryStore` wraps the pool. Its methods each run on a
//!   pooled connection and are single statements, except `repair_balance`
//!   which opens its own short transaction.
//! - `PostgresInventoryTx` wraps one `sqlx::Transaction`. Lock methods use
//!   `SELECT .. FOR UPDATE`; balance deltas use an additive upsert that
//!   leaves the snapshot row locked. Dropping the value without `commit`
//!   rolls everything back.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, DatabaseConfig, PostgresInventoryStore};
//! use domain_inventory::services::AdjustmentService;
//! use std::sync::Arc;
//!
//! let pool = create_pool(DatabaseConfig::new(url).run_migrations(true)).await?;
//! let store = Arc::new(PostgresInventoryStore::new(pool));
//! let adjustments = AdjustmentService::new(store, Arc::new(SystemClock));
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, instrument};

use core_kernel::{
    AdapterHealth, AdjustmentId, CountId, DomainPort, HealthCheckResult, HealthCheckable, MovementId, PortError,
    PutawayId, Quantity, ReceiptId, ReceiptLineId, ReservationId, TenantId,
};
use domain_inventory::reconciliation::{LedgerTotal, ReservationTotal};
use domain_inventory::{
    Adjustment, BalanceDelta, BalanceKey, BalanceRepair, BalanceSnapshot, IdempotencyRecord, IdempotencyStatus,
    InventoryCount, InventoryStore, InventoryTx, Movement, Putaway, PutawayTotals, QcEvent, QcTotals, Receipt,
    ReceiptLineContext, Reservation, ResponseRef,
};

use crate::error::DatabaseError;
use crate::repositories::{
    AdjustmentRepository, BalanceRepository, CountRepository, IdempotencyRepository, LedgerRepository,
    PutawayRepository, ReceiptRepository, ReservationRepository,
};

const ADAPTER_ID: &str = "postgres-inventory-store";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// PostgreSQL-backed implementation of `InventoryStore`
///
/// # Error Handling
///
/// Database errors are translated to `PortError` variants through
/// `From<DatabaseError>`; serialization failures and deadlocks surface as
/// transient errors the caller may retry.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool, for migrations and ad-hoc queries
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn connection(&self) -> Result<PoolConnection<Postgres>, PortError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| PortError::from(DatabaseError::from(e)))
    }
}

impl DomainPort for PostgresInventoryStore {}

#[async_trait]
impl HealthCheckable for PostgresInventoryStore {
    /// Runs `SELECT 1` against the pool
    ///
    /// A query that does not answer within `HEALTH_CHECK_TIMEOUT` reports
    /// the adapter as degraded rather than unhealthy.
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let result = tokio::time::timeout(
            HEALTH_CHECK_TIMEOUT,
            sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool),
        )
        .await;

        let latency_ms = start.elapsed().as_millis() as u64;

        let (status, message) = match result {
            Ok(Ok(_)) => (AdapterHealth::Healthy, None),
            Ok(Err(e)) => (AdapterHealth::Unhealthy, Some(format!("Database error: {}", e))),
            Err(_) => (
                AdapterHealth::Degraded,
                Some(format!("No answer within {}ms", HEALTH_CHECK_TIMEOUT.as_millis())),
            ),
        };

        HealthCheckResult {
            adapter_id: ADAPTER_ID.to_string(),
            status,
            latency_ms,
            message,
            checked_at: Utc::now(),
        }
    }
}

/// A unit of work backed by one PostgreSQL transaction
pub struct PostgresInventoryTx {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresInventoryTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresInventoryTx").finish_non_exhaustive()
    }
}

#[async_trait]
impl InventoryTx for PostgresInventoryTx {
    #[instrument(skip(self, movement), fields(movement_id = %movement.id, lines = movement.lines.len()))]
    async fn insert_movement(&mut self, movement: &Movement) -> Result<(), PortError> {
        debug!("Inserting movement");
        LedgerRepository::insert(&mut self.tx, movement).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, key = %key))]
    async fn apply_balance_delta(
        &mut self,
        tenant_id: TenantId,
        key: &BalanceKey,
        delta: BalanceDelta,
        now: DateTime<Utc>,
    ) -> Result<BalanceSnapshot, PortError> {
        Ok(BalanceRepository::apply_delta(&mut self.tx, tenant_id, key, delta, now).await?)
    }

    async fn ledger_on_hand(&mut self, tenant_id: TenantId, key: &BalanceKey) -> Result<Quantity, PortError> {
        Ok(LedgerRepository::on_hand(&mut self.tx, tenant_id, key).await?)
    }

    async fn insert_adjustment(&mut self, adjustment: &Adjustment) -> Result<(), PortError> {
        Ok(AdjustmentRepository::insert(&mut self.tx, adjustment).await?)
    }

    async fn lock_adjustment(&mut self, tenant_id: TenantId, id: AdjustmentId) -> Result<Option<Adjustment>, PortError> {
        Ok(AdjustmentRepository::find(&mut self.tx, tenant_id, id, true).await?)
    }

    async fn update_adjustment(&mut self, adjustment: &Adjustment) -> Result<(), PortError> {
        Ok(AdjustmentRepository::update(&mut self.tx, adjustment).await?)
    }

    async fn insert_count(&mut self, count: &InventoryCount) -> Result<(), PortError> {
        Ok(CountRepository::insert(&mut self.tx, count).await?)
    }

    async fn lock_count(&mut self, tenant_id: TenantId, id: CountId) -> Result<Option<InventoryCount>, PortError> {
        Ok(CountRepository::find(&mut self.tx, tenant_id, id, true).await?)
    }

    async fn update_count(&mut self, count: &InventoryCount) -> Result<(), PortError> {
        Ok(CountRepository::update(&mut self.tx, count).await?)
    }

    #[instrument(skip(self, receipt), fields(receipt_id = %receipt.id))]
    async fn insert_receipt(&mut self, receipt: &Receipt) -> Result<(), PortError> {
        debug!("Inserting receipt");
        Ok(ReceiptRepository::insert(&mut self.tx, receipt).await?)
    }

    async fn lock_receipt(&mut self, tenant_id: TenantId, id: ReceiptId) -> Result<Option<Receipt>, PortError> {
        Ok(ReceiptRepository::find(&mut self.tx, tenant_id, id, true).await?)
    }

    async fn update_receipt(&mut self, receipt: &Receipt) -> Result<(), PortError> {
        Ok(ReceiptRepository::update(&mut self.tx, receipt).await?)
    }

    async fn lock_receipt_line(
        &mut self,
        tenant_id: TenantId,
        id: ReceiptLineId,
    ) -> Result<Option<ReceiptLineContext>, PortError> {
        Ok(ReceiptRepository::find_line(&mut self.tx, tenant_id, id, true).await?)
    }

    async fn qc_totals(&mut self, tenant_id: TenantId, receipt_line_id: ReceiptLineId) -> Result<QcTotals, PortError> {
        Ok(ReceiptRepository::qc_totals(&mut self.tx, tenant_id, receipt_line_id).await?)
    }

    async fn insert_qc_event(&mut self, event: &QcEvent) -> Result<(), PortError> {
        Ok(ReceiptRepository::insert_qc_event(&mut self.tx, event).await?)
    }

    async fn putaway_totals(
        &mut self,
        tenant_id: TenantId,
        receipt_line_id: ReceiptLineId,
    ) -> Result<PutawayTotals, PortError> {
        Ok(PutawayRepository::totals(&mut self.tx, tenant_id, receipt_line_id).await?)
    }

    async fn count_active_putaway_lines(&mut self, tenant_id: TenantId, receipt_id: ReceiptId) -> Result<u64, PortError> {
        Ok(PutawayRepository::count_active_lines(&mut self.tx, tenant_id, receipt_id).await?)
    }

    async fn insert_putaway(&mut self, putaway: &Putaway) -> Result<(), PortError> {
        Ok(PutawayRepository::insert(&mut self.tx, putaway).await?)
    }

    async fn lock_putaway(&mut self, tenant_id: TenantId, id: PutawayId) -> Result<Option<Putaway>, PortError> {
        Ok(PutawayRepository::find(&mut self.tx, tenant_id, id, true).await?)
    }

    async fn update_putaway(&mut self, putaway: &Putaway) -> Result<(), PortError> {
        Ok(PutawayRepository::update(&mut self.tx, putaway).await?)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), PortError> {
        Ok(ReservationRepository::insert(&mut self.tx, reservation).await?)
    }

    async fn lock_reservation(
        &mut self,
        tenant_id: TenantId,
        id: ReservationId,
    ) -> Result<Option<Reservation>, PortError> {
        Ok(ReservationRepository::find(&mut self.tx, tenant_id, id, true).await?)
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), PortError> {
        Ok(ReservationRepository::update(&mut self.tx, reservation).await?)
    }

    async fn commit(self) -> Result<(), PortError> {
        self.tx
            .commit()
            .await
            .map_err(|e| PortError::from(DatabaseError::from(e)))
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    type Tx = PostgresInventoryTx;

    async fn begin(&self) -> Result<Self::Tx, PortError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::from(DatabaseError::from(e)))?;
        Ok(PostgresInventoryTx { tx })
    }

    async fn ledger_totals(&self, tenant_id: TenantId) -> Result<Vec<LedgerTotal>, PortError> {
        let mut conn = self.connection().await?;
        Ok(LedgerRepository::totals(&mut conn, tenant_id).await?)
    }

    async fn reservation_totals(&self, tenant_id: TenantId) -> Result<Vec<ReservationTotal>, PortError> {
        let mut conn = self.connection().await?;
        Ok(ReservationRepository::totals(&mut conn, tenant_id).await?)
    }

    async fn balance_snapshots(&self, tenant_id: TenantId) -> Result<Vec<BalanceSnapshot>, PortError> {
        let mut conn = self.connection().await?;
        Ok(BalanceRepository::list(&mut conn, tenant_id).await?)
    }

    async fn balance_snapshot(&self, tenant_id: TenantId, key: &BalanceKey) -> Result<Option<BalanceSnapshot>, PortError> {
        let mut conn = self.connection().await?;
        Ok(BalanceRepository::find(&mut conn, tenant_id, key).await?)
    }

    #[instrument(skip(self, snapshot, repair), fields(tenant_id = %snapshot.tenant_id, key = %snapshot.key))]
    async fn repair_balance(&self, snapshot: &BalanceSnapshot, repair: &BalanceRepair) -> Result<(), PortError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::from(DatabaseError::from(e)))?;
        BalanceRepository::repair(&mut tx, snapshot, repair).await?;
        tx.commit().await.map_err(|e| PortError::from(DatabaseError::from(e)))?;
        debug!("Balance row repaired");
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>, PortError> {
        let mut conn = self.connection().await?;
        let mut tenants: BTreeSet<TenantId> = BTreeSet::new();
        tenants.extend(LedgerRepository::tenants(&mut conn).await?);
        tenants.extend(ReservationRepository::tenants(&mut conn).await?);
        tenants.extend(BalanceRepository::tenants(&mut conn).await?);
        Ok(tenants.into_iter().collect())
    }

    async fn find_movement(&self, tenant_id: TenantId, id: MovementId) -> Result<Option<Movement>, PortError> {
        let mut conn = self.connection().await?;
        Ok(LedgerRepository::find(&mut conn, tenant_id, id).await?)
    }

    async fn find_adjustment(&self, tenant_id: TenantId, id: AdjustmentId) -> Result<Option<Adjustment>, PortError> {
        let mut conn = self.connection().await?;
        Ok(AdjustmentRepository::find(&mut conn, tenant_id, id, false).await?)
    }

    async fn find_count(&self, tenant_id: TenantId, id: CountId) -> Result<Option<InventoryCount>, PortError> {
        let mut conn = self.connection().await?;
        Ok(CountRepository::find(&mut conn, tenant_id, id, false).await?)
    }

    async fn find_receipt(&self, tenant_id: TenantId, id: ReceiptId) -> Result<Option<Receipt>, PortError> {
        let mut conn = self.connection().await?;
        Ok(ReceiptRepository::find(&mut conn, tenant_id, id, false).await?)
    }

    async fn find_receipt_by_idempotency_key(&self, tenant_id: TenantId, key: &str) -> Result<Option<Receipt>, PortError> {
        let mut conn = self.connection().await?;
        Ok(ReceiptRepository::find_by_idempotency_key(&mut conn, tenant_id, key).await?)
    }

    async fn find_receipt_line(
        &self,
        tenant_id: TenantId,
        id: ReceiptLineId,
    ) -> Result<Option<ReceiptLineContext>, PortError> {
        let mut conn = self.connection().await?;
        Ok(ReceiptRepository::find_line(&mut conn, tenant_id, id, false).await?)
    }

    async fn find_putaway(&self, tenant_id: TenantId, id: PutawayId) -> Result<Option<Putaway>, PortError> {
        let mut conn = self.connection().await?;
        Ok(PutawayRepository::find(&mut conn, tenant_id, id, false).await?)
    }

    async fn find_reservation(&self, tenant_id: TenantId, id: ReservationId) -> Result<Option<Reservation>, PortError> {
        let mut conn = self.connection().await?;
        Ok(ReservationRepository::find(&mut conn, tenant_id, id, false).await?)
    }

    async fn receipt_line_qc_totals(&self, tenant_id: TenantId, id: ReceiptLineId) -> Result<QcTotals, PortError> {
        let mut conn = self.connection().await?;
        Ok(ReceiptRepository::qc_totals(&mut conn, tenant_id, id).await?)
    }

    async fn receipt_line_putaway_totals(&self, tenant_id: TenantId, id: ReceiptLineId) -> Result<PutawayTotals, PortError> {
        let mut conn = self.connection().await?;
        Ok(PutawayRepository::totals(&mut conn, tenant_id, id).await?)
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(TenantId, ReservationId)>, PortError> {
        let mut conn = self.connection().await?;
        Ok(ReservationRepository::expired(&mut conn, now, limit).await?)
    }

    #[instrument(skip(self, record), fields(tenant_id = %record.tenant_id, key = %record.key))]
    async fn insert_idempotency(&self, record: &IdempotencyRecord) -> Result<bool, PortError> {
        let mut conn = self.connection().await?;
        Ok(IdempotencyRepository::insert(&mut conn, record).await?)
    }

    async fn find_idempotency(&self, tenant_id: TenantId, key: &str) -> Result<Option<IdempotencyRecord>, PortError> {
        let mut conn = self.connection().await?;
        Ok(IdempotencyRepository::find(&mut conn, tenant_id, key).await?)
    }

    async fn reclaim_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
        request_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PortError> {
        let mut conn = self.connection().await?;
        Ok(IdempotencyRepository::reclaim(&mut conn, tenant_id, key, request_hash, now).await?)
    }

    async fn complete_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
        status: IdempotencyStatus,
        response_ref: Option<&ResponseRef>,
        now: DateTime<Utc>,
    ) -> Result<bool, PortError> {
        let mut conn = self.connection().await?;
        Ok(IdempotencyRepository::complete(&mut conn, tenant_id, key, status, response_ref, now).await?)
    }

    async fn expire_idempotency(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, PortError> {
        let mut conn = self.connection().await?;
        Ok(IdempotencyRepository::expire(&mut conn, stale_before, now).await?)
    }
}
