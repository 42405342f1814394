//! Reservation repository

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::{ItemId, LocationId, Quantity, ReservationId, TenantId};
use domain_inventory::reconciliation::ReservationTotal;
use domain_inventory::{BalanceKey, Reservation, ReservationStatus};

use crate::error::DatabaseError;
use crate::repositories::{parse_column, with_lock};

const RESERVATION_COLUMNS: &str = "id, tenant_id, item_id, location_id, uom, demand_ref, status, \
     quantity_reserved, quantity_fulfilled, expires_at, created_at, updated_at";

/// Data access for `reservations`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReservationRepository;

impl ReservationRepository {
    pub async fn insert(conn: &mut PgConnection, reservation: &Reservation) -> Result<(), DatabaseError> {
        sqlx::query(&format!(
            "INSERT INTO reservations ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            RESERVATION_COLUMNS
        ))
        .bind(Uuid::from(reservation.id))
        .bind(Uuid::from(reservation.tenant_id))
        .bind(Uuid::from(reservation.key.item_id))
        .bind(Uuid::from(reservation.key.location_id))
        .bind(&reservation.key.uom)
        .bind(&reservation.demand_ref)
        .bind(reservation.status.as_str())
        .bind(Decimal::from(reservation.quantity_reserved))
        .bind(Decimal::from(reservation.quantity_fulfilled))
        .bind(reservation.expires_at)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn find(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        id: ReservationId,
        lock: bool,
    ) -> Result<Option<Reservation>, DatabaseError> {
        let sql = with_lock(
            &format!(
                "SELECT {} FROM reservations WHERE tenant_id = $1 AND id = $2",
                RESERVATION_COLUMNS
            ),
            lock,
        );
        let row = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(Uuid::from(tenant_id))
            .bind(Uuid::from(id))
            .fetch_optional(&mut *conn)
            .await?;

        row.map(Reservation::try_from).transpose()
    }

    pub async fn update(conn: &mut PgConnection, reservation: &Reservation) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = $3, quantity_fulfilled = $4, updated_at = $5
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(Uuid::from(reservation.tenant_id))
        .bind(Uuid::from(reservation.id))
        .bind(reservation.status.as_str())
        .bind(Decimal::from(reservation.quantity_fulfilled))
        .bind(reservation.updated_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Reservation", reservation.id));
        }
        Ok(())
    }

    /// Open quantity per key: RESERVED and ALLOCATED rows count as reserved,
    /// ALLOCATED rows also count as allocated
    pub async fn totals(conn: &mut PgConnection, tenant_id: TenantId) -> Result<Vec<ReservationTotal>, DatabaseError> {
        let rows = sqlx::query_as::<_, ReservationTotalRow>(
            r#"
            SELECT item_id, location_id, uom,
                   SUM(GREATEST(quantity_reserved - quantity_fulfilled, 0)) AS reserved,
                   COALESCE(SUM(GREATEST(quantity_reserved - quantity_fulfilled, 0))
                       FILTER (WHERE status = 'ALLOCATED'), 0) AS allocated
            FROM reservations
            WHERE tenant_id = $1 AND status IN ('RESERVED', 'ALLOCATED')
            GROUP BY item_id, location_id, uom
            ORDER BY item_id, location_id, uom
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ReservationTotal {
                key: BalanceKey::new(ItemId::from(row.item_id), LocationId::from(row.location_id), row.uom),
                reserved: Quantity::new(row.reserved),
                allocated: Quantity::new(row.allocated),
            })
            .collect())
    }

    /// Open reservations due at `now`, oldest expiry first, across tenants
    pub async fn expired(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(TenantId, ReservationId)>, DatabaseError> {
        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT tenant_id, id
            FROM reservations
            WHERE status IN ('RESERVED', 'ALLOCATED')
              AND expires_at IS NOT NULL
              AND expires_at <= $1
            ORDER BY expires_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(tenant_id, id)| (TenantId::from(tenant_id), ReservationId::from(id)))
            .collect())
    }

    /// Tenants with at least one reservation
    pub async fn tenants(conn: &mut PgConnection) -> Result<Vec<TenantId>, DatabaseError> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT DISTINCT tenant_id FROM reservations")
            .fetch_all(&mut *conn)
            .await?;
        Ok(ids.into_iter().map(TenantId::from).collect())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReservationRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub uom: String,
    pub demand_ref: String,
    pub status: String,
    pub quantity_reserved: Decimal,
    pub quantity_fulfilled: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = DatabaseError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let status: ReservationStatus = parse_column("status", &row.status)?;
        Ok(Reservation {
            id: ReservationId::from(row.id),
            tenant_id: TenantId::from(row.tenant_id),
            key: BalanceKey::new(ItemId::from(row.item_id), LocationId::from(row.location_id), row.uom),
            demand_ref: row.demand_ref,
            status,
            quantity_reserved: Quantity::new(row.quantity_reserved),
            quantity_fulfilled: Quantity::new(row.quantity_fulfilled),
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReservationTotalRow {
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub uom: String,
    pub reserved: Decimal,
    pub allocated: Decimal,
}
