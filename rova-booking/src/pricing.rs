use chrono::{DateTime, Utc};
use rova_core::Car;
use serde::{Deserialize, Serialize};

/// Price breakdown for one rental window, derived server-side from the
/// car's stored rate. Client-supplied amounts are never an input here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentalQuote {
    pub rental_days: i64,
    pub original_price_minor: i64,
    pub final_price_minor: i64,
    pub discount_percent: u8,
}

/// Quote a rental: days are billed whole, rounding any partial day up,
/// with a one-day minimum. The car's discount percentage is applied on top
/// of the un-discounted total, all in integer minor units.
pub fn quote_rental(car: &Car, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> RentalQuote {
    let seconds = (end_time - start_time).num_seconds().max(0);
    let rental_days = ((seconds + 86_399) / 86_400).max(1);

    let original_price_minor = car.daily_rate_minor * rental_days;
    let discount_percent = car.discount_percent.min(100);
    let discount_minor = original_price_minor * i64::from(discount_percent) / 100;

    RentalQuote {
        rental_days,
        original_price_minor,
        final_price_minor: original_price_minor - discount_minor,
        discount_percent,
    }
}
