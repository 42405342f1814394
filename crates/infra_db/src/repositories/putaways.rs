//! Putaway repository
//!
//! Besides the document itself this repository answers the two questions
//! receiving asks about putaways: how much of a receipt line is already
//! posted or pending, and whether anything still draws on a receipt.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::{ItemId, LocationId, MovementId, PutawayId, PutawayLineId, Quantity, ReceiptId, ReceiptLineId, TenantId};
use domain_inventory::{DocumentStatus, Putaway, PutawayLine, PutawayLineStatus, PutawayTotals};

use crate::error::DatabaseError;
use crate::repositories::{line_number, parse_column, with_lock};

/// Data access for `putaways` and `putaway_lines`
#[derive(Debug, Clone, Copy, Default)]
pub struct PutawayRepository;

impl PutawayRepository {
    pub async fn insert(conn: &mut PgConnection, putaway: &Putaway) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO putaways (
                id, tenant_id, status, receipt_id, notes, movement_id,
                created_at, posted_at, canceled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::from(putaway.id))
        .bind(Uuid::from(putaway.tenant_id))
        .bind(putaway.status.as_str())
        .bind(putaway.receipt_id.map(Uuid::from))
        .bind(&putaway.notes)
        .bind(putaway.movement_id.map(Uuid::from))
        .bind(putaway.created_at)
        .bind(putaway.posted_at)
        .bind(putaway.canceled_at)
        .execute(&mut *conn)
        .await?;

        for line in &putaway.lines {
            sqlx::query(
                r#"
                INSERT INTO putaway_lines (
                    id, putaway_id, tenant_id, line_number, receipt_line_id, item_id,
                    uom, from_location_id, to_location_id, quantity, status
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(Uuid::from(line.id))
            .bind(Uuid::from(putaway.id))
            .bind(Uuid::from(putaway.tenant_id))
            .bind(line.line_number as i32)
            .bind(Uuid::from(line.receipt_line_id))
            .bind(Uuid::from(line.item_id))
            .bind(&line.uom)
            .bind(Uuid::from(line.from_location_id))
            .bind(Uuid::from(line.to_location_id))
            .bind(Decimal::from(line.quantity))
            .bind(line.status.as_str())
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    /// Loads a putaway; with `lock` the header and its lines stay locked
    pub async fn find(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        id: PutawayId,
        lock: bool,
    ) -> Result<Option<Putaway>, DatabaseError> {
        let header_sql = with_lock(
            r#"
            SELECT id, tenant_id, status, receipt_id, notes, movement_id,
                   created_at, posted_at, canceled_at
            FROM putaways
            WHERE tenant_id = $1 AND id = $2
            "#,
            lock,
        );
        let header = sqlx::query_as::<_, PutawayRow>(&header_sql)
            .bind(Uuid::from(tenant_id))
            .bind(Uuid::from(id))
            .fetch_optional(&mut *conn)
            .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let lines_sql = with_lock(
            r#"
            SELECT id, line_number, receipt_line_id, item_id, uom,
                   from_location_id, to_location_id, quantity, status
            FROM putaway_lines
            WHERE putaway_id = $1
            ORDER BY line_number
            "#,
            lock,
        );
        let lines = sqlx::query_as::<_, PutawayLineRow>(&lines_sql)
            .bind(header.id)
            .fetch_all(&mut *conn)
            .await?;

        header.into_putaway(lines).map(Some)
    }

    /// Persists the header lifecycle and every line status
    pub async fn update(conn: &mut PgConnection, putaway: &Putaway) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE putaways
            SET status = $3, movement_id = $4, posted_at = $5, canceled_at = $6
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(Uuid::from(putaway.tenant_id))
        .bind(Uuid::from(putaway.id))
        .bind(putaway.status.as_str())
        .bind(putaway.movement_id.map(Uuid::from))
        .bind(putaway.posted_at)
        .bind(putaway.canceled_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Putaway", putaway.id));
        }

        for line in &putaway.lines {
            sqlx::query("UPDATE putaway_lines SET status = $2 WHERE id = $1")
                .bind(Uuid::from(line.id))
                .bind(line.status.as_str())
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    /// Completed quantity on posted putaways and pending quantity on drafts
    pub async fn totals(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        receipt_line_id: ReceiptLineId,
    ) -> Result<PutawayTotals, DatabaseError> {
        let row = sqlx::query_as::<_, PutawayTotalsRow>(
            r#"
            SELECT
                COALESCE(SUM(l.quantity) FILTER (
                    WHERE p.status = 'posted' AND l.status = 'completed'), 0) AS posted,
                COALESCE(SUM(l.quantity) FILTER (
                    WHERE p.status = 'draft' AND l.status = 'pending'), 0) AS pending
            FROM putaway_lines l
            JOIN putaways p ON p.id = l.putaway_id
            WHERE l.tenant_id = $1 AND l.receipt_line_id = $2
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(receipt_line_id))
        .fetch_one(&mut *conn)
        .await?;

        Ok(PutawayTotals {
            posted: Quantity::new(row.posted),
            pending: Quantity::new(row.pending),
        })
    }

    /// Pending or completed lines drawing on any line of a receipt
    pub async fn count_active_lines(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        receipt_id: ReceiptId,
    ) -> Result<u64, DatabaseError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM putaway_lines l
            JOIN receipt_lines rl ON rl.id = l.receipt_line_id
            WHERE l.tenant_id = $1 AND rl.receipt_id = $2 AND l.status <> 'canceled'
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(receipt_id))
        .fetch_one(&mut *conn)
        .await?;

        Ok(count.max(0) as u64)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PutawayRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub receipt_id: Option<Uuid>,
    pub notes: Option<String>,
    pub movement_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PutawayLineRow {
    pub id: Uuid,
    pub line_number: i32,
    pub receipt_line_id: Uuid,
    pub item_id: Uuid,
    pub uom: String,
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    pub quantity: Decimal,
    pub status: String,
}

impl PutawayRow {
    fn into_putaway(self, lines: Vec<PutawayLineRow>) -> Result<Putaway, DatabaseError> {
        let status: DocumentStatus = parse_column("status", &self.status)?;
        let lines = lines
            .into_iter()
            .map(|line| {
                let line_status: PutawayLineStatus = parse_column("status", &line.status)?;
                Ok(PutawayLine {
                    id: PutawayLineId::from(line.id),
                    line_number: line_number(line.line_number)?,
                    receipt_line_id: ReceiptLineId::from(line.receipt_line_id),
                    item_id: ItemId::from(line.item_id),
                    uom: line.uom,
                    from_location_id: LocationId::from(line.from_location_id),
                    to_location_id: LocationId::from(line.to_location_id),
                    quantity: Quantity::new(line.quantity),
                    status: line_status,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        Ok(Putaway {
            id: PutawayId::from(self.id),
            tenant_id: TenantId::from(self.tenant_id),
            status,
            receipt_id: self.receipt_id.map(ReceiptId::from),
            notes: self.notes,
            movement_id: self.movement_id.map(MovementId::from),
            created_at: self.created_at,
            posted_at: self.posted_at,
            canceled_at: self.canceled_at,
            lines,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PutawayTotalsRow {
    pub posted: Decimal,
    pub pending: Decimal,
}
