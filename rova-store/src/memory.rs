//! In-memory backend over `tokio::sync::RwLock` tables.
//!
//! Every trait operation takes the lock once and finishes under it, so
//! the conditional reservation insert and the settle compare-and-set are
//! atomic without further coordination. Serves tests and single-node
//! deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use rova_core::{
    Car, CarStore, PaymentSession, PaymentSessionStore, PaymentStatus, Reservation,
    ReservationInsert, ReservationStatus, ReservationStore, SettlementUpdate, StoreError,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    cars: HashMap<Uuid, Car>,
    reservations: HashMap<Uuid, Reservation>,
    sessions: HashMap<String, PaymentSession>,
}

pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CarStore for MemoryStore {
    async fn insert_car(&self, car: &Car) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.cars.insert(car.id, car.clone());
        Ok(())
    }

    async fn get_car(&self, id: Uuid) -> Result<Option<Car>, StoreError> {
        let state = self.state.read().await;
        Ok(state.cars.get(&id).cloned())
    }

    async fn list_cars(&self) -> Result<Vec<Car>, StoreError> {
        let state = self.state.read().await;
        let mut cars: Vec<Car> = state.cars.values().cloned().collect();
        cars.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(cars)
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn insert_if_available(
        &self,
        reservation: &Reservation,
    ) -> Result<ReservationInsert, StoreError> {
        // Scan and insert under one write acquisition; this is what makes
        // the insert conditional-atomic
        let mut state = self.state.write().await;
        let conflict = state.reservations.values().any(|existing| {
            existing.car_id == reservation.car_id
                && existing.blocks_window()
                && existing.overlaps(reservation.start_time, reservation.end_time)
        });
        if conflict {
            return Ok(ReservationInsert::Overlap);
        }
        state
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(ReservationInsert::Inserted)
    }

    async fn get_reservation(&self, id: Uuid) -> Result<Option<Reservation>, StoreError> {
        let state = self.state.read().await;
        Ok(state.reservations.get(&id).cloned())
    }

    async fn list_for_car(&self, car_id: Uuid) -> Result<Vec<Reservation>, StoreError> {
        let state = self.state.read().await;
        let mut reservations: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.car_id == car_id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.start_time);
        Ok(reservations)
    }

    async fn set_status(&self, id: Uuid, status: ReservationStatus) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let reservation = state
            .reservations
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("reservation {id}")))?;
        reservation.update_status(status);
        Ok(())
    }
}

#[async_trait]
impl PaymentSessionStore for MemoryStore {
    async fn insert_session(&self, session: &PaymentSession) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.sessions.contains_key(&session.order_id) {
            return Err(StoreError::DuplicateOrderId(session.order_id.clone()));
        }
        state
            .sessions
            .insert(session.order_id.clone(), session.clone());
        Ok(())
    }

    async fn get_by_order_id(&self, order_id: &str) -> Result<Option<PaymentSession>, StoreError> {
        let state = self.state.read().await;
        Ok(state.sessions.get(order_id).cloned())
    }

    async fn settle(
        &self,
        order_id: &str,
        update: SettlementUpdate,
    ) -> Result<PaymentSession, StoreError> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(order_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment session {order_id}")))?;
        if session.status.is_terminal() {
            return Err(StoreError::AlreadySettled(order_id.to_string()));
        }
        session.status = update.status;
        session.gateway_txn_ref = update.gateway_txn_ref;
        session.gateway_response_code = update.gateway_response_code;
        session.bank_code = update.bank_code;
        session.settled_at = Some(update.settled_at);
        Ok(session.clone())
    }

    async fn find_unreconciled(&self) -> Result<Vec<PaymentSession>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.status == PaymentStatus::Completed)
            .filter(|s| {
                matches!(
                    state.reservations.get(&s.reservation_id).map(|r| r.status),
                    Some(ReservationStatus::Pending)
                )
            })
            .cloned()
            .collect())
    }
}
