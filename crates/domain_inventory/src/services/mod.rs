//! Application services
//!
//! Each service owns an `Arc` of the store and a clock and runs one unit of
//! work per call. Domain rules live on the entities; the services decide
//! what to lock, in which order, and when to commit.

pub mod ledger;
pub mod adjustments;
pub mod counts;
pub mod receiving;
pub mod putaways;
pub mod reservations;
pub mod reconciler;
pub mod idempotency;

pub use ledger::{post_document, post_movement, Posted};
pub use adjustments::AdjustmentService;
pub use counts::CountService;
pub use receiving::ReceivingService;
pub use putaways::PutawayService;
pub use reservations::ReservationService;
pub use reconciler::BalanceReconciler;
pub use idempotency::IdempotencyCoordinator;
