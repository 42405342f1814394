//! Idempotency coordinator
//!
//! Guarantees at most one effect per (tenant, key). The first caller to
//! insert the record owns the key; everyone else either replays the stored
//! result, is told the original is still running, or is rejected for
//! reusing the key with a different payload.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use core_kernel::{Clock, TenantId};

use crate::error::{InventoryError, InventoryResult};
use crate::idempotency::{validate_key, IdempotencyBegin, IdempotencyRecord, IdempotencyStatus, ResponseRef};
use crate::ports::InventoryStore;

pub struct IdempotencyCoordinator<S: InventoryStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: InventoryStore> IdempotencyCoordinator<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Claims a key or reports what an earlier request left behind
    ///
    /// A FAILED record with the same hash is reclaimed and handed back as
    /// new, so a failed request can be retried under its original key.
    ///
    /// # Errors
    ///
    /// `IDEMPOTENCY_HASH_MISMATCH` when the key was first used for a
    /// different payload.
    #[instrument(skip(self, request_hash))]
    pub async fn begin(&self, tenant_id: TenantId, key: &str, request_hash: &str) -> InventoryResult<IdempotencyBegin> {
        validate_key(key)?;
        let now = self.clock.now();

        let record = IdempotencyRecord::start(tenant_id, key, request_hash, now);
        if self.store.insert_idempotency(&record).await? {
            debug!("Idempotency key claimed");
            return Ok(IdempotencyBegin::fresh(key));
        }

        let existing = self.load(tenant_id, key).await?;
        if existing.request_hash != request_hash {
            warn!("Idempotency key reused with a different payload");
            return Err(InventoryError::IdempotencyHashMismatch { key: key.to_string() });
        }

        if existing.status == IdempotencyStatus::Failed {
            if self.store.reclaim_idempotency(tenant_id, key, request_hash, now).await? {
                info!("Reclaimed failed idempotency key");
                return Ok(IdempotencyBegin::fresh(key));
            }
            // Another caller reclaimed it first; report its state.
            let current = self.load(tenant_id, key).await?;
            return Ok(existing_begin(current));
        }

        Ok(existing_begin(existing))
    }

    /// Records the terminal outcome of the request that owns the key
    ///
    /// Returns false when the record was no longer IN_PROGRESS, for example
    /// because the stale-key sweep already failed it.
    #[instrument(skip(self, response_ref))]
    pub async fn complete(
        &self,
        tenant_id: TenantId,
        key: &str,
        status: IdempotencyStatus,
        response_ref: Option<ResponseRef>,
    ) -> InventoryResult<bool> {
        if !status.is_terminal() {
            return Err(InventoryError::validation("idempotency records complete as SUCCEEDED or FAILED"));
        }
        let updated = self
            .store
            .complete_idempotency(tenant_id, key, status, response_ref.as_ref(), self.clock.now())
            .await?;
        if !updated {
            warn!("Idempotency record was not in progress; left unchanged");
        }
        Ok(updated)
    }

    /// Fails IN_PROGRESS records untouched for longer than `ttl`
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, ttl: Duration) -> InventoryResult<u64> {
        let now = self.clock.now();
        let expired = self.store.expire_idempotency(now - ttl, now).await?;
        if expired > 0 {
            warn!(expired, "Expired stuck idempotency keys");
        }
        Ok(expired)
    }

    async fn load(&self, tenant_id: TenantId, key: &str) -> InventoryResult<IdempotencyRecord> {
        self.store
            .find_idempotency(tenant_id, key)
            .await?
            .ok_or_else(|| InventoryError::not_found("IdempotencyRecord", key))
    }
}

fn existing_begin(record: IdempotencyRecord) -> IdempotencyBegin {
    IdempotencyBegin {
        key: record.key,
        status: record.status,
        is_new: false,
        response_ref: record.response_ref,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryInventoryStore;
    use chrono::Utc;
    use core_kernel::FixedClock;
    use uuid::Uuid;

    fn coordinator() -> (IdempotencyCoordinator<InMemoryInventoryStore>, FixedClock) {
        let clock = FixedClock::at(Utc::now());
        let store = Arc::new(InMemoryInventoryStore::new());
        (IdempotencyCoordinator::new(store, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_second_begin_sees_in_flight_original() {
        let (coordinator, _) = coordinator();
        let tenant = TenantId::new();

        let first = coordinator.begin(tenant, "abc", "h1").await.unwrap();
        assert!(first.is_new);

        let second = coordinator.begin(tenant, "abc", "h1").await.unwrap();
        assert!(!second.is_new);
        assert_eq!(second.status, IdempotencyStatus::InProgress);
        assert!(second.ensure_not_in_flight().is_err());
    }

    #[tokio::test]
    async fn test_succeeded_key_replays_reference() {
        let (coordinator, _) = coordinator();
        let tenant = TenantId::new();
        let reference = ResponseRef::new("receipt", Uuid::new_v4());

        coordinator.begin(tenant, "abc", "h1").await.unwrap();
        assert!(coordinator
            .complete(tenant, "abc", IdempotencyStatus::Succeeded, Some(reference.clone()))
            .await
            .unwrap());

        let again = coordinator.begin(tenant, "abc", "h1").await.unwrap();
        assert_eq!(again.replay(), Some(&reference));
    }

    #[tokio::test]
    async fn test_hash_mismatch_is_rejected() {
        let (coordinator, _) = coordinator();
        let tenant = TenantId::new();
        coordinator.begin(tenant, "abc", "h1").await.unwrap();

        let err = coordinator.begin(tenant, "abc", "h2").await.unwrap_err();
        assert_eq!(err.code(), "IDEMPOTENCY_HASH_MISMATCH");
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_tenant() {
        let (coordinator, _) = coordinator();
        assert!(coordinator.begin(TenantId::new(), "abc", "h1").await.unwrap().is_new);
        assert!(coordinator.begin(TenantId::new(), "abc", "h2").await.unwrap().is_new);
    }

    #[tokio::test]
    async fn test_failed_key_can_be_retried_with_same_payload() {
        let (coordinator, _) = coordinator();
        let tenant = TenantId::new();
        coordinator.begin(tenant, "abc", "h1").await.unwrap();
        coordinator
            .complete(tenant, "abc", IdempotencyStatus::Failed, None)
            .await
            .unwrap();

        let retry = coordinator.begin(tenant, "abc", "h1").await.unwrap();
        assert!(retry.is_new);
    }

    #[tokio::test]
    async fn test_stale_in_progress_keys_expire() {
        let (coordinator, clock) = coordinator();
        let tenant = TenantId::new();
        coordinator.begin(tenant, "stuck", "h1").await.unwrap();

        assert_eq!(coordinator.expire_stale(Duration::minutes(15)).await.unwrap(), 0);
        clock.advance(Duration::minutes(16));
        assert_eq!(coordinator.expire_stale(Duration::minutes(15)).await.unwrap(), 1);

        // The sweep failed the key, so the original can no longer complete it.
        assert!(!coordinator
            .complete(tenant, "stuck", IdempotencyStatus::Succeeded, None)
            .await
            .unwrap());
        assert!(coordinator.begin(tenant, "stuck", "h1").await.unwrap().is_new);
    }

    #[tokio::test]
    async fn test_complete_rejects_in_progress_status() {
        let (coordinator, _) = coordinator();
        let err = coordinator
            .complete(TenantId::new(), "abc", IdempotencyStatus::InProgress, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }
}
