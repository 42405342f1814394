//! Adjustment and count document repositories
//!
//! Both documents are a header plus numbered lines. Lines are written once
//! at creation; afterwards only the header lifecycle columns change, plus
//! the system quantity and variance a count captures at posting time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::{
    AdjustmentId, AdjustmentLineId, CountId, CountLineId, ItemId, LocationId, MovementId, Quantity, TenantId,
};
use domain_inventory::{Adjustment, AdjustmentLine, CountLine, DocumentStatus, InventoryCount};

use crate::error::DatabaseError;
use crate::repositories::{line_number, parse_column, with_lock};

/// Data access for `adjustments` and `adjustment_lines`
#[derive(Debug, Clone, Copy, Default)]
pub struct AdjustmentRepository;

impl AdjustmentRepository {
    pub async fn insert(conn: &mut PgConnection, adjustment: &Adjustment) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO adjustments (
                id, tenant_id, status, occurred_at, reason, notes, external_ref,
                movement_id, created_at, posted_at, canceled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::from(adjustment.id))
        .bind(Uuid::from(adjustment.tenant_id))
        .bind(adjustment.status.as_str())
        .bind(adjustment.occurred_at)
        .bind(&adjustment.reason)
        .bind(&adjustment.notes)
        .bind(&adjustment.external_ref)
        .bind(adjustment.movement_id.map(Uuid::from))
        .bind(adjustment.created_at)
        .bind(adjustment.posted_at)
        .bind(adjustment.canceled_at)
        .execute(&mut *conn)
        .await?;

        for line in &adjustment.lines {
            sqlx::query(
                r#"
                INSERT INTO adjustment_lines (
                    id, adjustment_id, line_number, item_id, location_id,
                    uom, quantity_delta, reason_code
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::from(line.id))
            .bind(Uuid::from(adjustment.id))
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

    /// Loads an adjustment; with `lock` the header stays locked until commit
    pub async fn find(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        id: AdjustmentId,
        lock: bool,
    ) -> Result<Option<Adjustment>, DatabaseError> {
        let sql = with_lock(
            r#"
            SELECT id, tenant_id, status, occurred_at, reason, notes, external_ref,
                   movement_id, created_at, posted_at, canceled_at
            FROM adjustments
            WHERE tenant_id = $1 AND id = $2
            "#,
            lock,
        );
        let header = sqlx::query_as::<_, AdjustmentRow>(&sql)
            .bind(Uuid::from(tenant_id))
            .bind(Uuid::from(id))
            .fetch_optional(&mut *conn)
            .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, AdjustmentLineRow>(
            r#"
            SELECT id, line_number, item_id, location_id, uom, quantity_delta, reason_code
            FROM adjustment_lines
            WHERE adjustment_id = $1
            ORDER BY line_number
            "#,
        )
        .bind(header.id)
        .fetch_all(&mut *conn)
        .await?;

        header.into_adjustment(lines).map(Some)
    }

    /// Persists the header lifecycle columns
    pub async fn update(conn: &mut PgConnection, adjustment: &Adjustment) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE adjustments
            SET status = $3, movement_id = $4, posted_at = $5, canceled_at = $6
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(Uuid::from(adjustment.tenant_id))
        .bind(Uuid::from(adjustment.id))
        .bind(adjustment.status.as_str())
        .bind(adjustment.movement_id.map(Uuid::from))
        .bind(adjustment.posted_at)
        .bind(adjustment.canceled_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Adjustment", adjustment.id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AdjustmentRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub occurred_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub external_ref: Option<String>,
    pub movement_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AdjustmentLineRow {
    pub id: Uuid,
    pub line_number: i32,
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub uom: String,
    pub quantity_delta: Decimal,
    pub reason_code: Option<String>,
}

impl AdjustmentRow {
    fn into_adjustment(self, lines: Vec<AdjustmentLineRow>) -> Result<Adjustment, DatabaseError> {
        let status: DocumentStatus = parse_column("status", &self.status)?;
        let lines = lines
            .into_iter()
            .map(|line| {
                Ok(AdjustmentLine {
                    id: AdjustmentLineId::from(line.id),
                    line_number: line_number(line.line_number)?,
                    item_id: ItemId::from(line.item_id),
                    location_id: LocationId::from(line.location_id),
                    uom: line.uom,
                    quantity_delta: Quantity::new(line.quantity_delta),
                    reason_code: line.reason_code,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        Ok(Adjustment {
            id: AdjustmentId::from(self.id),
            tenant_id: TenantId::from(self.tenant_id),
            status,
            occurred_at: self.occurred_at,
            reason: self.reason,
            notes: self.notes,
            external_ref: self.external_ref,
            movement_id: self.movement_id.map(MovementId::from),
            created_at: self.created_at,
            posted_at: self.posted_at,
            canceled_at: self.canceled_at,
            lines,
        })
    }
}

/// Data access for `counts` and `count_lines`
#[derive(Debug, Clone, Copy, Default)]
pub struct CountRepository;

impl CountRepository {
    pub async fn insert(conn: &mut PgConnection, count: &InventoryCount) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO counts (
                id, tenant_id, status, occurred_at, notes, movement_id,
                created_at, posted_at, canceled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::from(count.id))
        .bind(Uuid::from(count.tenant_id))
        .bind(count.status.as_str())
        .bind(count.occurred_at)
        .bind(&count.notes)
        .bind(count.movement_id.map(Uuid::from))
        .bind(count.created_at)
        .bind(count.posted_at)
        .bind(count.canceled_at)
        .execute(&mut *conn)
        .await?;

        for line in &count.lines {
            sqlx::query(
                r#"
                INSERT INTO count_lines (
                    id, count_id, line_number, item_id, location_id, uom,
                    counted_quantity, system_quantity, variance, reason_code
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(Uuid::from(line.id))
            .bind(Uuid::from(count.id))
            .bind(line.line_number as i32)
            .bind(Uuid::from(line.item_id))
            .bind(Uuid::from(line.location_id))
            .bind(&line.uom)
            .bind(Decimal::from(line.counted_quantity))
            .bind(line.system_quantity.map(Decimal::from))
            .bind(line.variance.map(Decimal::from))
            .bind(&line.reason_code)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    pub async fn find(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        id: CountId,
        lock: bool,
    ) -> Result<Option<InventoryCount>, DatabaseError> {
        let sql = with_lock(
            r#"
            SELECT id, tenant_id, status, occurred_at, notes, movement_id,
                   created_at, posted_at, canceled_at
            FROM counts
            WHERE tenant_id = $1 AND id = $2
            "#,
            lock,
        );
        let header = sqlx::query_as::<_, CountRow>(&sql)
            .bind(Uuid::from(tenant_id))
            .bind(Uuid::from(id))
            .fetch_optional(&mut *conn)
            .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, CountLineRow>(
            r#"
            SELECT id, line_number, item_id, location_id, uom, counted_quantity,
                   system_quantity, variance, reason_code
            FROM count_lines
            WHERE count_id = $1
            ORDER BY line_number
            "#,
        )
        .bind(header.id)
        .fetch_all(&mut *conn)
        .await?;

        header.into_count(lines).map(Some)
    }

    /// Persists the header lifecycle and the captured line quantities
    pub async fn update(conn: &mut PgConnection, count: &InventoryCount) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE counts
            SET status = $3, movement_id = $4, posted_at = $5, canceled_at = $6
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(Uuid::from(count.tenant_id))
        .bind(Uuid::from(count.id))
        .bind(count.status.as_str())
        .bind(count.movement_id.map(Uuid::from))
        .bind(count.posted_at)
        .bind(count.canceled_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Count", count.id));
        }

        for line in &count.lines {
            sqlx::query(
                r#"
                UPDATE count_lines
                SET system_quantity = $2, variance = $3
                WHERE id = $1
                "#,
            )
            .bind(Uuid::from(line.id))
            .bind(line.system_quantity.map(Decimal::from))
            .bind(line.variance.map(Decimal::from))
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CountRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub occurred_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub movement_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CountLineRow {
    pub id: Uuid,
    pub line_number: i32,
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub uom: String,
    pub counted_quantity: Decimal,
    pub system_quantity: Option<Decimal>,
    pub variance: Option<Decimal>,
    pub reason_code: Option<String>,
}

impl CountRow {
    fn into_count(self, lines: Vec<CountLineRow>) -> Result<InventoryCount, DatabaseError> {
        let status: DocumentStatus = parse_column("status", &self.status)?;
        let lines = lines
            .into_iter()
            .map(|line| {
                Ok(CountLine {
                    id: CountLineId::from(line.id),
                    line_number: line_number(line.line_number)?,
                    item_id: ItemId::from(line.item_id),
                    location_id: LocationId::from(line.location_id),
                    uom: line.uom,
                    counted_quantity: Quantity::new(line.counted_quantity),
                    system_quantity: line.system_quantity.map(Quantity::new),
                    variance: line.variance.map(Quantity::new),
                    reason_code: line.reason_code,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        Ok(InventoryCount {
            id: CountId::from(self.id),
            tenant_id: TenantId::from(self.tenant_id),
            status,
            occurred_at: self.occurred_at,
            notes: self.notes,
            movement_id: self.movement_id.map(MovementId::from),
            created_at: self.created_at,
            posted_at: self.posted_at,
            canceled_at: self.canceled_at,
            lines,
        })
    }
}
