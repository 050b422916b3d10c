use std::sync::Arc;

use rova_booking::AvailabilityGuard;
use rova_core::CarStore;
use rova_payment::{PaymentSessionManager, SettlementReconciler};

#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<AvailabilityGuard>,
    pub payments: Arc<PaymentSessionManager>,
    pub reconciler: Arc<SettlementReconciler>,
    pub cars: Arc<dyn CarStore>,
    /// Where the customer's browser lands after a callback is processed
    pub client_result_url: String,
}
