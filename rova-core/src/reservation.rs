use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reservation status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Returned,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Returned => "RETURNED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ReservationStatus::Pending),
            "CONFIRMED" => Some(ReservationStatus::Confirmed),
            "CANCELLED" => Some(ReservationStatus::Cancelled),
            "RETURNED" => Some(ReservationStatus::Returned),
            _ => None,
        }
    }
}

/// A time-bounded claim on one car
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub car_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ReservationStatus,
    pub original_price_minor: i64,
    pub final_price_minor: i64,
    pub discount_percent: u8,
    pub customer_email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        car_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        original_price_minor: i64,
        final_price_minor: i64,
        discount_percent: u8,
        customer_email: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            car_id,
            start_time,
            end_time,
            status: ReservationStatus::Pending,
            original_price_minor,
            final_price_minor,
            discount_percent,
            customer_email,
            created_at: now,
            updated_at: now,
        }
    }

    /// Half-open overlap test against another window. Windows that merely
    /// touch at an endpoint do not overlap.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && self.end_time > start
    }

    /// Whether this reservation still occupies its window. Cancelled
    /// reservations never block a new booking.
    pub fn blocks_window(&self) -> bool {
        self.status != ReservationStatus::Cancelled
    }

    /// Update reservation status
    pub fn update_status(&mut self, new_status: ReservationStatus) {
        self.status = new_status;
        self.updated_at = Utc::now();
    }
}
