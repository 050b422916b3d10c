pub mod guard;
pub mod pricing;

pub use guard::{AvailabilityGuard, BookingError};
pub use pricing::{quote_rental, RentalQuote};
