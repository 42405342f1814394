//! Reservation lifecycle
//!
//! Every transition writes the reservation and the matching change to the
//! snapshot's reserved and allocated columns in one unit of work.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use core_kernel::{Clock, Quantity, ReservationId, TenantId};

use crate::balance::BalanceDelta;
use crate::error::{InventoryError, InventoryResult};
use crate::ports::{InventoryStore, InventoryTx};
use crate::reservation::{NewReservation, Reservation};

pub struct ReservationService<S: InventoryStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: InventoryStore> ReservationService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Places a hold against on-hand stock at one key
    ///
    /// # Errors
    ///
    /// `QUANTITY_EXCEEDED` when the hold would reserve more than is on hand.
    #[instrument(skip(self, request), fields(demand_ref = %request.demand_ref))]
    pub async fn create_reservation(&self, tenant_id: TenantId, request: NewReservation) -> InventoryResult<Reservation> {
        request.validate()?;
        let now = self.clock.now();
        let (reservation, delta) = Reservation::reserve(tenant_id, request, now);

        let mut tx = self.store.begin().await?;
        let snapshot = tx.apply_balance_delta(tenant_id, &reservation.key, delta, now).await?;
        snapshot.ensure_non_negative()?;
        if snapshot.reserved.exceeds(snapshot.on_hand) {
            let already_reserved = snapshot.reserved - reservation.quantity_reserved;
            return Err(InventoryError::QuantityExceeded {
                requested: reservation.quantity_reserved,
                available: (snapshot.on_hand - already_reserved).clamp_non_negative(),
            });
        }
        tx.insert_reservation(&reservation).await?;
        tx.commit().await?;

        info!(reservation_id = %reservation.id, quantity = %reservation.quantity_reserved, "Reservation placed");
        Ok(reservation)
    }

    #[instrument(skip(self))]
    pub async fn allocate_reservation(&self, tenant_id: TenantId, id: ReservationId) -> InventoryResult<Reservation> {
        self.transition(tenant_id, id, |reservation, now| reservation.allocate(now))
            .await
    }

    /// Records fulfilment of part or all of an allocated reservation
    #[instrument(skip(self))]
    pub async fn fulfill_reservation(
        &self,
        tenant_id: TenantId,
        id: ReservationId,
        quantity: Quantity,
    ) -> InventoryResult<Reservation> {
        self.transition(tenant_id, id, move |reservation, now| reservation.fulfill(quantity, now))
            .await
    }

    #[instrument(skip(self))]
    pub async fn cancel_reservation(&self, tenant_id: TenantId, id: ReservationId) -> InventoryResult<Reservation> {
        self.transition(tenant_id, id, |reservation, now| reservation.cancel(now))
            .await
    }

    /// Expires open reservations whose expiry has passed
    ///
    /// Reservations closed by another caller between the scan and the lock
    /// are skipped. Returns how many were expired.
    #[instrument(skip(self))]
    pub async fn expire_reservations(&self, limit: usize) -> InventoryResult<usize> {
        let due = self.store.expired_reservations(self.clock.now(), limit).await?;
        let mut expired = 0;
        for (tenant_id, id) in due {
            let outcome = self
                .transition(tenant_id, id, |reservation, now| {
                    if !reservation.is_expired_at(now) {
                        return Err(InventoryError::not_eligible("reservation is no longer due"));
                    }
                    reservation.expire(now)
                })
                .await;
            match outcome {
                Ok(_) => expired += 1,
                Err(InventoryError::InvalidStatusTransition { .. }) | Err(InventoryError::NotEligible(_)) => {
                    debug!(reservation_id = %id, "Reservation closed before it could expire");
                }
                Err(err) => return Err(err),
            }
        }
        if expired > 0 {
            info!(expired, "Expired reservations");
        }
        Ok(expired)
    }

    pub async fn get_reservation(&self, tenant_id: TenantId, id: ReservationId) -> InventoryResult<Reservation> {
        self.store
            .find_reservation(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Reservation", id))
    }

    async fn transition<F>(&self, tenant_id: TenantId, id: ReservationId, apply: F) -> InventoryResult<Reservation>
    where
        F: FnOnce(&mut Reservation, DateTime<Utc>) -> InventoryResult<BalanceDelta> + Send,
    {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut reservation = tx
            .lock_reservation(tenant_id, id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Reservation", id))?;

        let delta = apply(&mut reservation, now)?;
        if !delta.is_zero() {
            let snapshot = tx.apply_balance_delta(tenant_id, &reservation.key, delta, now).await?;
            snapshot.ensure_non_negative()?;
        }
        tx.update_reservation(&reservation).await?;
        tx.commit().await?;

        info!(reservation_id = %id, status = %reservation.status, "Reservation updated");
        Ok(reservation)
    }
}
