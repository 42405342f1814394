//! Balance snapshot repository
//!
//! Postings add deltas to `balance_snapshot` with an additive upsert so a
//! missing row starts at zero. The upsert leaves the row locked until the
//! surrounding transaction ends, which serializes concurrent postings on
//! the same key.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::{ItemId, LocationId, Quantity, TenantId};
use domain_inventory::{BalanceDelta, BalanceKey, BalanceRepair, BalanceSnapshot};

use crate::error::DatabaseError;

const SNAPSHOT_COLUMNS: &str = "tenant_id, item_id, location_id, uom, on_hand, reserved, allocated, updated_at";

/// Data access for `balance_snapshot` and `balance_repairs`
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceRepository;

impl BalanceRepository {
    /// Adds `delta` to the row for `key` and returns the resulting row
    pub async fn apply_delta(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        key: &BalanceKey,
        delta: BalanceDelta,
        now: DateTime<Utc>,
    ) -> Result<BalanceSnapshot, DatabaseError> {
        let row = sqlx::query_as::<_, BalanceRow>(&format!(
            r#"
            INSERT INTO balance_snapshot ({columns})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, item_id, location_id, uom) DO UPDATE SET
                on_hand = balance_snapshot.on_hand + EXCLUDED.on_hand,
                reserved = balance_snapshot.reserved + EXCLUDED.reserved,
                allocated = balance_snapshot.allocated + EXCLUDED.allocated,
                updated_at = EXCLUDED.updated_at
            RETURNING {columns}
            "#,
            columns = SNAPSHOT_COLUMNS
        ))
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(key.item_id))
        .bind(Uuid::from(key.location_id))
        .bind(&key.uom)
        .bind(Decimal::from(delta.on_hand))
        .bind(Decimal::from(delta.reserved))
        .bind(Decimal::from(delta.allocated))
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        Ok(row.into())
    }

    pub async fn find(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        key: &BalanceKey,
    ) -> Result<Option<BalanceSnapshot>, DatabaseError> {
        let row = sqlx::query_as::<_, BalanceRow>(&format!(
            r#"
            SELECT {}
            FROM balance_snapshot
            WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3 AND uom = $4
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(key.item_id))
        .bind(Uuid::from(key.location_id))
        .bind(&key.uom)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(Into::into))
    }

    pub async fn list(conn: &mut PgConnection, tenant_id: TenantId) -> Result<Vec<BalanceSnapshot>, DatabaseError> {
        let rows = sqlx::query_as::<_, BalanceRow>(&format!(
            r#"
            SELECT {}
            FROM balance_snapshot
            WHERE tenant_id = $1
            ORDER BY item_id, location_id, uom
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(Uuid::from(tenant_id))
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Overwrites the row with ledger truth and appends the audit record
    ///
    /// Run inside a transaction so the two writes land together.
    pub async fn repair(
        conn: &mut PgConnection,
        snapshot: &BalanceSnapshot,
        repair: &BalanceRepair,
    ) -> Result<(), DatabaseError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO balance_snapshot ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, item_id, location_id, uom) DO UPDATE SET
                on_hand = EXCLUDED.on_hand,
                reserved = EXCLUDED.reserved,
                allocated = EXCLUDED.allocated,
                updated_at = EXCLUDED.updated_at
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(Uuid::from(snapshot.tenant_id))
        .bind(Uuid::from(snapshot.key.item_id))
        .bind(Uuid::from(snapshot.key.location_id))
        .bind(&snapshot.key.uom)
        .bind(Decimal::from(snapshot.on_hand))
        .bind(Decimal::from(snapshot.reserved))
        .bind(Decimal::from(snapshot.allocated))
        .bind(snapshot.updated_at)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO balance_repairs (
                id, tenant_id, run_id, actor, item_id, location_id, uom, source,
                previous_on_hand, previous_reserved, previous_allocated,
                on_hand, reserved, allocated, repaired_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(Uuid::from(repair.id))
        .bind(Uuid::from(repair.tenant_id))
        .bind(Uuid::from(repair.run_id))
        .bind(&repair.actor)
        .bind(Uuid::from(repair.key.item_id))
        .bind(Uuid::from(repair.key.location_id))
        .bind(&repair.key.uom)
        .bind(repair.source.as_str())
        .bind(Decimal::from(repair.previous_on_hand))
        .bind(Decimal::from(repair.previous_reserved))
        .bind(Decimal::from(repair.previous_allocated))
        .bind(Decimal::from(repair.on_hand))
        .bind(Decimal::from(repair.reserved))
        .bind(Decimal::from(repair.allocated))
        .bind(repair.repaired_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Tenants with at least one snapshot row
    pub async fn tenants(conn: &mut PgConnection) -> Result<Vec<TenantId>, DatabaseError> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT DISTINCT tenant_id FROM balance_snapshot")
            .fetch_all(&mut *conn)
            .await?;
        Ok(ids.into_iter().map(TenantId::from).collect())
    }
}

/// Database row for a snapshot
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BalanceRow {
    pub tenant_id: Uuid,
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub uom: String,
    pub on_hand: Decimal,
    pub reserved: Decimal,
    pub allocated: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl From<BalanceRow> for BalanceSnapshot {
    fn from(row: BalanceRow) -> Self {
        BalanceSnapshot {
            tenant_id: TenantId::from(row.tenant_id),
            key: BalanceKey::new(ItemId::from(row.item_id), LocationId::from(row.location_id), row.uom),
            on_hand: Quantity::new(row.on_hand),
            reserved: Quantity::new(row.reserved),
            allocated: Quantity::new(row.allocated),
            updated_at: row.updated_at,
        }
    }
}
