pub mod fleet;
pub mod payment;
pub mod repository;
pub mod reservation;

pub use fleet::Car;
pub use payment::{PaymentMethod, PaymentSession, PaymentStatus, SettlementUpdate};
pub use repository::{
    CarStore, PaymentSessionStore, ReservationInsert, ReservationStore, StoreError,
};
pub use reservation::{Reservation, ReservationStatus};
