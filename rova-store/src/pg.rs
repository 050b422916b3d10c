//! Postgres backend over `sqlx`.
//!
//! The no-overlap invariant lives in the schema: a `btree_gist` exclusion
//! constraint over `(car_id, tstzrange(start_time, end_time))` restricted
//! to non-cancelled rows. `insert_if_available` is therefore a plain
//! insert whose exclusion violation (SQLSTATE 23P01) reports the overlap;
//! a check-then-insert statement would be open to write skew under
//! READ COMMITTED.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rova_core::{
    Car, CarStore, PaymentMethod, PaymentSession, PaymentSessionStore, PaymentStatus, Reservation,
    ReservationInsert, ReservationStatus, ReservationStore, SettlementUpdate, StoreError,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

const EXCLUSION_VIOLATION: &str = "23P01";
const UNIQUE_VIOLATION: &str = "23505";

const SCHEMA_DDL: &str = r#"
CREATE EXTENSION IF NOT EXISTS btree_gist;

CREATE TABLE IF NOT EXISTS cars (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    plate_number TEXT NOT NULL,
    daily_rate_minor BIGINT NOT NULL,
    discount_percent SMALLINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS reservations (
    id UUID PRIMARY KEY,
    car_id UUID NOT NULL REFERENCES cars(id),
    start_time TIMESTAMPTZ NOT NULL,
    end_time TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL,
    original_price_minor BIGINT NOT NULL,
    final_price_minor BIGINT NOT NULL,
    discount_percent SMALLINT NOT NULL DEFAULT 0,
    customer_email TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT reservations_window_valid CHECK (start_time < end_time)
);

DO $$
BEGIN
    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'reservations_no_overlap'
    ) THEN
        ALTER TABLE reservations
            ADD CONSTRAINT reservations_no_overlap
            EXCLUDE USING gist (
                car_id WITH =,
                tstzrange(start_time, end_time) WITH &&
            ) WHERE (status <> 'CANCELLED');
    END IF;
END $$;

CREATE INDEX IF NOT EXISTS idx_reservations_car_start ON reservations (car_id, start_time);

CREATE TABLE IF NOT EXISTS payment_sessions (
    order_id TEXT PRIMARY KEY,
    reservation_id UUID NOT NULL REFERENCES reservations(id),
    amount_minor BIGINT NOT NULL,
    method TEXT NOT NULL,
    status TEXT NOT NULL,
    gateway_txn_ref TEXT,
    gateway_response_code TEXT,
    bank_code TEXT,
    settled_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_payment_sessions_reservation ON payment_sessions (reservation_id);
"#;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(url)
            .await
            .map_err(backend)?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the schema. Every statement is idempotent, so running this
    /// on every startup is safe.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("Running database migrations...");
        sqlx::raw_sql(SCHEMA_DDL)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn db_error_code(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn parse_reservation_status(s: &str) -> Result<ReservationStatus, StoreError> {
    ReservationStatus::parse(s)
        .ok_or_else(|| StoreError::Backend(format!("corrupt reservation status: {s}")))
}

fn parse_payment_status(s: &str) -> Result<PaymentStatus, StoreError> {
    PaymentStatus::parse(s)
        .ok_or_else(|| StoreError::Backend(format!("corrupt payment status: {s}")))
}

fn parse_method(s: &str) -> Result<PaymentMethod, StoreError> {
    match s {
        "CARD" => Ok(PaymentMethod::Card),
        "BANK" => Ok(PaymentMethod::DomesticBank),
        "WALLET" => Ok(PaymentMethod::Wallet),
        other => Err(StoreError::Backend(format!(
            "corrupt payment method: {other}"
        ))),
    }
}

fn row_to_car(row: &PgRow) -> Result<Car, StoreError> {
    Ok(Car {
        id: row.try_get("id").map_err(backend)?,
        name: row.try_get("name").map_err(backend)?,
        plate_number: row.try_get("plate_number").map_err(backend)?,
        daily_rate_minor: row.try_get("daily_rate_minor").map_err(backend)?,
        discount_percent: row.try_get::<i16, _>("discount_percent").map_err(backend)? as u8,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn row_to_reservation(row: &PgRow) -> Result<Reservation, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(Reservation {
        id: row.try_get("id").map_err(backend)?,
        car_id: row.try_get("car_id").map_err(backend)?,
        start_time: row.try_get("start_time").map_err(backend)?,
        end_time: row.try_get("end_time").map_err(backend)?,
        status: parse_reservation_status(&status)?,
        original_price_minor: row.try_get("original_price_minor").map_err(backend)?,
        final_price_minor: row.try_get("final_price_minor").map_err(backend)?,
        discount_percent: row.try_get::<i16, _>("discount_percent").map_err(backend)? as u8,
        customer_email: row.try_get("customer_email").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn row_to_session(row: &PgRow) -> Result<PaymentSession, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    let method: String = row.try_get("method").map_err(backend)?;
    Ok(PaymentSession {
        order_id: row.try_get("order_id").map_err(backend)?,
        reservation_id: row.try_get("reservation_id").map_err(backend)?,
        amount_minor: row.try_get("amount_minor").map_err(backend)?,
        method: parse_method(&method)?,
        status: parse_payment_status(&status)?,
        gateway_txn_ref: row.try_get("gateway_txn_ref").map_err(backend)?,
        gateway_response_code: row.try_get("gateway_response_code").map_err(backend)?,
        bank_code: row.try_get("bank_code").map_err(backend)?,
        settled_at: row
            .try_get::<Option<DateTime<Utc>>, _>("settled_at")
            .map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

#[async_trait]
impl CarStore for PgStore {
    async fn insert_car(&self, car: &Car) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cars (id, name, plate_number, daily_rate_minor, discount_percent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                plate_number = EXCLUDED.plate_number,
                daily_rate_minor = EXCLUDED.daily_rate_minor,
                discount_percent = EXCLUDED.discount_percent
            "#,
        )
        .bind(car.id)
        .bind(&car.name)
        .bind(&car.plate_number)
        .bind(car.daily_rate_minor)
        .bind(car.discount_percent as i16)
        .bind(car.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_car(&self, id: Uuid) -> Result<Option<Car>, StoreError> {
        let row = sqlx::query("SELECT * FROM cars WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_car).transpose()
    }

    async fn list_cars(&self) -> Result<Vec<Car>, StoreError> {
        let rows = sqlx::query("SELECT * FROM cars ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_car).collect()
    }
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn insert_if_available(
        &self,
        reservation: &Reservation,
    ) -> Result<ReservationInsert, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO reservations
                (id, car_id, start_time, end_time, status, original_price_minor,
                 final_price_minor, discount_percent, customer_email, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.car_id)
        .bind(reservation.start_time)
        .bind(reservation.end_time)
        .bind(reservation.status.as_str())
        .bind(reservation.original_price_minor)
        .bind(reservation.final_price_minor)
        .bind(reservation.discount_percent as i16)
        .bind(&reservation.customer_email)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(ReservationInsert::Inserted),
            Err(e) if db_error_code(&e).as_deref() == Some(EXCLUSION_VIOLATION) => {
                Ok(ReservationInsert::Overlap)
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn get_reservation(&self, id: Uuid) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_reservation).transpose()
    }

    async fn list_for_car(&self, car_id: Uuid) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query("SELECT * FROM reservations WHERE car_id = $1 ORDER BY start_time")
            .bind(car_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_reservation).collect()
    }

    async fn set_status(&self, id: Uuid, status: ReservationStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE reservations SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("reservation {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentSessionStore for PgStore {
    async fn insert_session(&self, session: &PaymentSession) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_sessions
                (order_id, reservation_id, amount_minor, method, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&session.order_id)
        .bind(session.reservation_id)
        .bind(session.amount_minor)
        .bind(session.method.gateway_code())
        .bind(session.status.as_str())
        .bind(session.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if db_error_code(&e).as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::DuplicateOrderId(session.order_id.clone()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn get_by_order_id(&self, order_id: &str) -> Result<Option<PaymentSession>, StoreError> {
        let row = sqlx::query("SELECT * FROM payment_sessions WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn settle(
        &self,
        order_id: &str,
        update: SettlementUpdate,
    ) -> Result<PaymentSession, StoreError> {
        // Compare-and-set on PENDING keeps terminal states monotonic under
        // concurrent callbacks
        let row = sqlx::query(
            r#"
            UPDATE payment_sessions
            SET status = $2,
                gateway_txn_ref = $3,
                gateway_response_code = $4,
                bank_code = $5,
                settled_at = $6
            WHERE order_id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(update.status.as_str())
        .bind(&update.gateway_txn_ref)
        .bind(&update.gateway_response_code)
        .bind(&update.bank_code)
        .bind(update.settled_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => row_to_session(&row),
            None => {
                // Either the session does not exist or it is already terminal
                let existing = self.get_by_order_id(order_id).await?;
                match existing {
                    Some(_) => Err(StoreError::AlreadySettled(order_id.to_string())),
                    None => Err(StoreError::NotFound(format!("payment session {order_id}"))),
                }
            }
        }
    }

    async fn find_unreconciled(&self) -> Result<Vec<PaymentSession>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.* FROM payment_sessions s
            JOIN reservations r ON r.id = s.reservation_id
            WHERE s.status = 'COMPLETED' AND r.status = 'PENDING'
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(row_to_session).collect()
    }
}
