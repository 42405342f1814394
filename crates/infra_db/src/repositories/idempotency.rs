//! Idempotency record repository
//!
//! Every write is a single conditional statement so that concurrent callers
//! racing on one key resolve inside the database: `INSERT .. ON CONFLICT DO
//! NOTHING` picks the first claimant and the guarded UPDATEs only move a
//! record out of the status the caller expects.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::TenantId;
use domain_inventory::{IdempotencyRecord, IdempotencyStatus, ResponseRef};

use crate::error::DatabaseError;
use crate::repositories::parse_column;

/// Data access for `idempotency_records`
#[derive(Debug, Clone, Copy, Default)]
pub struct IdempotencyRepository;

impl IdempotencyRepository {
    /// Claims a key; false when a record already exists
    pub async fn insert(conn: &mut PgConnection, record: &IdempotencyRecord) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_records (
                tenant_id, key, status, request_hash, response_kind, response_id,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, key) DO NOTHING
            "#,
        )
        .bind(Uuid::from(record.tenant_id))
        .bind(&record.key)
        .bind(record.status.as_str())
        .bind(&record.request_hash)
        .bind(record.response_ref.as_ref().map(|r| r.kind.clone()))
        .bind(record.response_ref.as_ref().map(|r| r.id))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn find(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, IdempotencyRow>(
            r#"
            SELECT tenant_id, key, status, request_hash, response_kind, response_id,
                   created_at, updated_at
            FROM idempotency_records
            WHERE tenant_id = $1 AND key = $2
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(IdempotencyRecord::try_from).transpose()
    }

    /// Moves a FAILED record with the same fingerprint back to IN_PROGRESS
    pub async fn reclaim(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        key: &str,
        request_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = 'IN_PROGRESS', response_kind = NULL, response_id = NULL, updated_at = $4
            WHERE tenant_id = $1 AND key = $2 AND request_hash = $3 AND status = 'FAILED'
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(key)
        .bind(request_hash)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Finishes an IN_PROGRESS record; false if it was in any other status
    pub async fn complete(
        conn: &mut PgConnection,
        tenant_id: TenantId,
        key: &str,
        status: IdempotencyStatus,
        response_ref: Option<&ResponseRef>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = $3, response_kind = $4, response_id = $5, updated_at = $6
            WHERE tenant_id = $1 AND key = $2 AND status = 'IN_PROGRESS'
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(key)
        .bind(status.as_str())
        .bind(response_ref.map(|r| r.kind.clone()))
        .bind(response_ref.map(|r| r.id))
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fails IN_PROGRESS records not touched since `stale_before`
    pub async fn expire(
        conn: &mut PgConnection,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = 'FAILED', updated_at = $2
            WHERE status = 'IN_PROGRESS' AND updated_at < $1
            "#,
        )
        .bind(stale_before)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdempotencyRow {
    pub tenant_id: Uuid,
    pub key: String,
    pub status: String,
    pub request_hash: String,
    pub response_kind: Option<String>,
    pub response_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<IdempotencyRow> for IdempotencyRecord {
    type Error = DatabaseError;

    fn try_from(row: IdempotencyRow) -> Result<Self, Self::Error> {
        let status: IdempotencyStatus = parse_column("status", &row.status)?;
        let response_ref = match (row.response_kind, row.response_id) {
            (Some(kind), Some(id)) => Some(ResponseRef::new(kind, id)),
            _ => None,
        };
        Ok(IdempotencyRecord {
            tenant_id: TenantId::from(row.tenant_id),
            key: row.key,
            status,
            request_hash: row.request_hash,
            response_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
