//! Movement ledger repository
//!
//! Movements and their lines are only ever inserted. The aggregate queries
//! here are the ledger side of reconciliation and of count posting.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::{ItemId, LocationId, MovementId, MovementLineId, Quantity, TenantId};
use domain_inventory::movement::{DocumentKind, MovementStatus, MovementType};
use domain_inventory::reconciliation::LedgerTotal;
use domain_inventory::{BalanceKey, DocumentRef, Movement, MovementLine};

use crate::error::DatabaseError;
use crate::repositories::{line_number, parse_column};

/// Data access for `movements` and `movement_lines`
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerRepository;

impl LedgerRepository {
    /// Appends a movement header followed by its lines
    pub async fn insert(conn: &mut PgConnection, movement: &Movement) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO movements (
                id, tenant_id, movement_type, status, source_kind, source_id,
                external_ref, occurred_at, posted_at, idempotency_key
            ) VALUES ($1, $2, $3, 'posted', $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::from(movement.id))
        .bind(Uuid::from(movement.tenant_id))
        .bind(movement.movement_type.as_str())
        .bind(movement.source.kind.as_str())
        .bind(movement.source.id)
        .bind(&movement.external_ref)
        .bind(movement.occurred_at)
        .bind(movement.posted_at)
        .bind(&movement.idempotency_key)
        .execute(&mut *conn)
        .await?;

        for line in &movement.lines {
            sqlx::query(
                r#"
                INSERT INTO movement_lines (
                    id, movement_id, tenant_id, line_number, item_id,
                    location_id, uom, quantity_delta, reason_code
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::from(line.id))
            .bind(Uuid::from(movement.id))
            .bind(Uuid::from(movement.tenant_id))
            .bind(line.line_number as i32)
            .bind(Uuid::from(line.item_id))
            .bind(Uuid::from(line.location_id))
            .bind(&line.uom)
            .bind(Decimal::from(line.quantity_delta))
            .bind(&line.reason_code)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    pub async fn find(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        id: MovementId,
    ) -> Result<Option<Movement>, DatabaseError> {
        let header = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT id, tenant_id, movement_type, source_kind, source_id,
                   external_ref, occurred_at, posted_at, idempotency_key
            FROM movements
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(id))
        .fetch_optional(&mut *conn)
        .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, MovementLineRow>(
            r#"
            SELECT id, line_number, item_id, location_id, uom, quantity_delta, reason_code
            FROM movement_lines
            WHERE movement_id = $1
            ORDER BY line_number
            "#,
        )
        .bind(header.id)
        .fetch_all(&mut *conn)
        .await?;

        header.into_movement(lines).map(Some)
    }

    /// Sum of all line deltas for one key
    pub async fn on_hand(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        key: &BalanceKey,
    ) -> Result<Quantity, DatabaseError> {
        let total: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity_delta), 0)
            FROM movement_lines
            WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3 AND uom = $4
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(key.item_id))
        .bind(Uuid::from(key.location_id))
        .bind(&key.uom)
        .fetch_one(&mut *conn)
        .await?;

        Ok(Quantity::new(total))
    }

    /// Signed deltas grouped by key
    pub async fn totals(conn: &mut PgConnection, tenant_id: TenantId) -> Result<Vec<LedgerTotal>, DatabaseError> {
        let rows = sqlx::query_as::<_, KeyTotalRow>(
            r#"
            SELECT item_id, location_id, uom, SUM(quantity_delta) AS total
            FROM movement_lines
            WHERE tenant_id = $1
            GROUP BY item_id, location_id, uom
            ORDER BY item_id, location_id, uom
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LedgerTotal {
                key: BalanceKey::new(ItemId::from(row.item_id), LocationId::from(row.location_id), row.uom),
                on_hand: Quantity::new(row.total),
            })
            .collect())
    }

    /// Tenants with at least one posted movement
    pub async fn tenants(conn: &mut PgConnection) -> Result<Vec<TenantId>, DatabaseError> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT DISTINCT tenant_id FROM movements")
            .fetch_all(&mut *conn)
            .await?;
        Ok(ids.into_iter().map(TenantId::from).collect())
    }
}

/// Database row for a movement header
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MovementRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub movement_type: String,
    pub source_kind: String,
    pub source_id: Uuid,
    pub external_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub posted_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MovementLineRow {
    pub id: Uuid,
    pub line_number: i32,
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub uom: String,
    pub quantity_delta: Decimal,
    pub reason_code: Option<String>,
}

impl MovementRow {
    fn into_movement(self, lines: Vec<MovementLineRow>) -> Result<Movement, DatabaseError> {
        let movement_type: MovementType = parse_column("movement_type", &self.movement_type)?;
        let source_kind: DocumentKind = parse_column("source_kind", &self.source_kind)?;

        let lines = lines
            .into_iter()
            .map(|line| {
                Ok(MovementLine {
                    id: MovementLineId::from(line.id),
                    line_number: line_number(line.line_number)?,
                    item_id: ItemId::from(line.item_id),
                    location_id: LocationId::from(line.location_id),
                    uom: line.uom,
                    quantity_delta: Quantity::new(line.quantity_delta),
                    reason_code: line.reason_code,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        Ok(Movement {
            id: MovementId::from(self.id),
            tenant_id: TenantId::from(self.tenant_id),
            movement_type,
            status: MovementStatus::Posted,
            source: DocumentRef::new(source_kind, self.source_id),
            external_ref: self.external_ref,
            occurred_at: self.occurred_at,
            posted_at: self.posted_at,
            idempotency_key: self.idempotency_key,
            lines,
        })
    }
}

/// A quantity summed per (item, location, uom)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KeyTotalRow {
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub uom: String,
    pub total: Decimal,
}
