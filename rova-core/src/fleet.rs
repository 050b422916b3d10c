use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A rentable vehicle. Managed by out-of-scope admin tooling; the booking
/// subsystem only reads it for existence checks and pricing inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Car {
    pub id: Uuid,
    pub name: String,
    pub plate_number: String,
    pub daily_rate_minor: i64,
    pub discount_percent: u8,
    pub created_at: DateTime<Utc>,
}

impl Car {
    pub fn new(name: String, plate_number: String, daily_rate_minor: i64, discount_percent: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            plate_number,
            daily_rate_minor,
            discount_percent,
            created_at: Utc::now(),
        }
    }
}
