//! Receipt and QC repository

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::{ItemId, LocationId, MovementId, Quantity, ReceiptId, ReceiptLineId, TenantId};
use domain_inventory::{QcEvent, QcEventType, QcTotals, Receipt, ReceiptLine, ReceiptLineContext, ReceiptStatus};

use crate::error::DatabaseError;
use crate::repositories::{line_number, parse_column, with_lock};

/// Locks a receipt line and shares the lock on its header
const RECEIPT_LINE_LOCK: &str = " FOR UPDATE OF l FOR SHARE OF r";

/// Data access for `receipts`, `receipt_lines` and `qc_events`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiptRepository;

impl ReceiptRepository {
    /// Inserts a receipt with its lines
    ///
    /// A second receipt with the same (tenant, idempotency key) fails with
    /// `DuplicateEntry`.
    pub async fn insert(conn: &mut PgConnection, receipt: &Receipt) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO receipts (
                id, tenant_id, status, purchase_order_ref, staging_location_id,
                received_at, idempotency_key, movement_id, void_movement_id,
                void_reason, voided_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::from(receipt.id))
        .bind(Uuid::from(receipt.tenant_id))
        .bind(receipt.status.as_str())
        .bind(&receipt.purchase_order_ref)
        .bind(Uuid::from(receipt.staging_location_id))
        .bind(receipt.received_at)
        .bind(&receipt.idempotency_key)
        .bind(receipt.movement_id.map(Uuid::from))
        .bind(receipt.void_movement_id.map(Uuid::from))
        .bind(&receipt.void_reason)
        .bind(receipt.voided_at)
        .bind(receipt.created_at)
        .execute(&mut *conn)
        .await?;

        for line in &receipt.lines {
            sqlx::query(
                r#"
                INSERT INTO receipt_lines (
                    id, receipt_id, tenant_id, line_number, item_id, uom, quantity_received
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::from(line.id))
            .bind(Uuid::from(receipt.id))
            .bind(Uuid::from(receipt.tenant_id))
            .bind(line.line_number as i32)
            .bind(Uuid::from(line.item_id))
            .bind(&line.uom)
            .bind(Decimal::from(line.quantity_received))
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    pub async fn find(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        id: ReceiptId,
        lock: bool,
    ) -> Result<Option<Receipt>, DatabaseError> {
        let sql = with_lock(
            r#"
            SELECT id, tenant_id, status, purchase_order_ref, staging_location_id,
                   received_at, idempotency_key, movement_id, void_movement_id,
                   void_reason, voided_at, created_at
            FROM receipts
            WHERE tenant_id = $1 AND id = $2
            "#,
            lock,
        );
        let header = sqlx::query_as::<_, ReceiptRow>(&sql)
            .bind(Uuid::from(tenant_id))
            .bind(Uuid::from(id))
            .fetch_optional(&mut *conn)
            .await?;

        match header {
            Some(header) => Self::with_lines(conn, header).await.map(Some),
            None => Ok(None),
        }
    }

    /// The receipt an idempotent create already stored under `key`
    pub async fn find_by_idempotency_key(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<Receipt>, DatabaseError> {
        let header = sqlx::query_as::<_, ReceiptRow>(
            r#"
            SELECT id, tenant_id, status, purchase_order_ref, staging_location_id,
                   received_at, idempotency_key, movement_id, void_movement_id,
                   void_reason, voided_at, created_at
            FROM receipts
            WHERE tenant_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

        match header {
            Some(header) => Self::with_lines(conn, header).await.map(Some),
            None => Ok(None),
        }
    }

    async fn with_lines(conn: &mut PgConnection, header: ReceiptRow) -> Result<Receipt, DatabaseError> {
        let lines = sqlx::query_as::<_, ReceiptLineRow>(
            r#"
            SELECT id, receipt_id, line_number, item_id, uom, quantity_received
            FROM receipt_lines
            WHERE receipt_id = $1
            ORDER BY line_number
            "#,
        )
        .bind(header.id)
        .fetch_all(&mut *conn)
        .await?;

        header.into_receipt(lines)
    }

    /// Persists the void columns; lines never change after receipt
    pub async fn update(conn: &mut PgConnection, receipt: &Receipt) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE receipts
            SET status = $3, movement_id = $4, void_movement_id = $5, void_reason = $6, voided_at = $7
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(Uuid::from(receipt.tenant_id))
        .bind(Uuid::from(receipt.id))
        .bind(receipt.status.as_str())
        .bind(receipt.movement_id.map(Uuid::from))
        .bind(receipt.void_movement_id.map(Uuid::from))
        .bind(&receipt.void_reason)
        .bind(receipt.voided_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Receipt", receipt.id));
        }
        Ok(())
    }

    /// Loads a receipt line with its header facts
    ///
    /// With `lock` the line row is locked for update and the header for
    /// share: putaways and QC events on one receipt do not serialize on
    /// each other, but they do conflict with a void holding the header
    /// `FOR UPDATE`, so the void's putaway count cannot go stale.
    pub async fn find_line(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        id: ReceiptLineId,
        lock: bool,
    ) -> Result<Option<ReceiptLineContext>, DatabaseError> {
        let mut sql = String::from(
            r#"
            SELECT l.id, l.receipt_id, l.line_number, l.item_id, l.uom, l.quantity_received,
                   r.tenant_id, r.status AS receipt_status, r.staging_location_id
            FROM receipt_lines l
            JOIN receipts r ON r.id = l.receipt_id
            WHERE l.tenant_id = $1 AND l.id = $2
            "#,
        );
        if lock {
            sql.push_str(RECEIPT_LINE_LOCK);
        }

        let row = sqlx::query_as::<_, ReceiptLineContextRow>(&sql)
            .bind(Uuid::from(tenant_id))
            .bind(Uuid::from(id))
            .fetch_optional(&mut *conn)
            .await?;

        row.map(ReceiptLineContextRow::into_context).transpose()
    }

    /// QC quantities recorded against a line, per event type
    pub async fn qc_totals(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        receipt_line_id: ReceiptLineId,
    ) -> Result<QcTotals, DatabaseError> {
        let rows = sqlx::query_as::<_, QcTotalRow>(
            r#"
            SELECT event_type, SUM(quantity) AS total
            FROM qc_events
            WHERE tenant_id = $1 AND receipt_line_id = $2
            GROUP BY event_type
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(receipt_line_id))
        .fetch_all(&mut *conn)
        .await?;

        let mut totals = QcTotals::default();
        for row in rows {
            let event_type: QcEventType = parse_column("event_type", &row.event_type)?;
            totals.add(event_type, Quantity::new(row.total));
        }
        Ok(totals)
    }

    /// Appends a QC event; an unknown receipt line is a `ForeignKeyViolation`
    pub async fn insert_qc_event(conn: &mut PgConnection, event: &QcEvent) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO qc_events (
                id, tenant_id, receipt_line_id, event_type, quantity,
                actor, notes, occurred_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::from(event.id))
        .bind(Uuid::from(event.tenant_id))
        .bind(Uuid::from(event.receipt_line_id))
        .bind(event.event_type.as_str())
        .bind(Decimal::from(event.quantity))
        .bind(&event.actor)
        .bind(&event.notes)
        .bind(event.occurred_at)
        .bind(event.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReceiptRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub purchase_order_ref: Option<String>,
    pub staging_location_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
    pub movement_id: Option<Uuid>,
    pub void_movement_id: Option<Uuid>,
    pub void_reason: Option<String>,
    pub voided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReceiptLineRow {
    pub id: Uuid,
    pub receipt_id: Uuid,
    pub line_number: i32,
    pub item_id: Uuid,
    pub uom: String,
    pub quantity_received: Decimal,
}

impl ReceiptLineRow {
    fn into_line(self) -> Result<ReceiptLine, DatabaseError> {
        Ok(ReceiptLine {
            id: ReceiptLineId::from(self.id),
            receipt_id: ReceiptId::from(self.receipt_id),
            line_number: line_number(self.line_number)?,
            item_id: ItemId::from(self.item_id),
            uom: self.uom,
            quantity_received: Quantity::new(self.quantity_received),
        })
    }
}

impl ReceiptRow {
    fn into_receipt(self, lines: Vec<ReceiptLineRow>) -> Result<Receipt, DatabaseError> {
        let status: ReceiptStatus = parse_column("status", &self.status)?;
        let lines = lines
            .into_iter()
            .map(ReceiptLineRow::into_line)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Receipt {
            id: ReceiptId::from(self.id),
            tenant_id: TenantId::from(self.tenant_id),
            status,
            purchase_order_ref: self.purchase_order_ref,
            staging_location_id: LocationId::from(self.staging_location_id),
            received_at: self.received_at,
            idempotency_key: self.idempotency_key,
            movement_id: self.movement_id.map(MovementId::from),
            void_movement_id: self.void_movement_id.map(MovementId::from),
            void_reason: self.void_reason,
            voided_at: self.voided_at,
            created_at: self.created_at,
            lines,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReceiptLineContextRow {
    #[sqlx(flatten)]
    pub line: ReceiptLineRow,
    pub tenant_id: Uuid,
    pub receipt_status: String,
    pub staging_location_id: Uuid,
}

impl ReceiptLineContextRow {
    fn into_context(self) -> Result<ReceiptLineContext, DatabaseError> {
        let receipt_status: ReceiptStatus = parse_column("receipt_status", &self.receipt_status)?;
        let line = self.line.into_line()?;
        Ok(ReceiptLineContext {
            tenant_id: TenantId::from(self.tenant_id),
            receipt_id: line.receipt_id,
            receipt_status,
            staging_location_id: LocationId::from(self.staging_location_id),
            line,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QcTotalRow {
    pub event_type: String,
    pub total: Decimal,
}
