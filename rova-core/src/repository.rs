use crate::fleet::Car;
use crate::payment::{PaymentSession, SettlementUpdate};
use crate::reservation::{Reservation, ReservationStatus};
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate order id: {0}")]
    DuplicateOrderId(String),

    #[error("session already settled: {0}")]
    AlreadySettled(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Outcome of the atomic conditional reservation insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationInsert {
    /// Reservation persisted; its window is now claimed
    Inserted,
    /// An existing non-cancelled reservation overlaps the window
    Overlap,
}

/// Repository trait for fleet data access
#[async_trait]
pub trait CarStore: Send + Sync {
    async fn insert_car(&self, car: &Car) -> Result<(), StoreError>;

    async fn get_car(&self, id: Uuid) -> Result<Option<Car>, StoreError>;

    async fn list_cars(&self) -> Result<Vec<Car>, StoreError>;
}

/// Repository trait for reservation data access.
///
/// `insert_if_available` is the interval store's one critical operation:
/// the overlap check and the insert execute as a single atomic step, so two
/// concurrent calls for overlapping windows on the same car can never both
/// return `Inserted`.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert_if_available(
        &self,
        reservation: &Reservation,
    ) -> Result<ReservationInsert, StoreError>;

    async fn get_reservation(&self, id: Uuid) -> Result<Option<Reservation>, StoreError>;

    async fn list_for_car(&self, car_id: Uuid) -> Result<Vec<Reservation>, StoreError>;

    async fn set_status(&self, id: Uuid, status: ReservationStatus) -> Result<(), StoreError>;
}

/// Repository trait for payment session data access.
///
/// `settle` is a guarded transition: it applies the update only while the
/// session is still pending and fails with `AlreadySettled` otherwise, which
/// keeps terminal states monotonic even under concurrent callbacks.
#[async_trait]
pub trait PaymentSessionStore: Send + Sync {
    async fn insert_session(&self, session: &PaymentSession) -> Result<(), StoreError>;

    async fn get_by_order_id(&self, order_id: &str) -> Result<Option<PaymentSession>, StoreError>;

    async fn settle(
        &self,
        order_id: &str,
        update: SettlementUpdate,
    ) -> Result<PaymentSession, StoreError>;

    /// Completed sessions whose owning reservation is still pending — the
    /// repair feed for the reconciliation sweep.
    async fn find_unreconciled(&self) -> Result<Vec<PaymentSession>, StoreError>;
}
