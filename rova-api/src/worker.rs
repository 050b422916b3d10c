use std::sync::Arc;

use rova_payment::SettlementReconciler;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Periodically re-applies reservation confirmations for settled sessions
/// whose booking write was lost. Runs for the life of the process.
pub async fn run_reconciliation_sweep(reconciler: Arc<SettlementReconciler>, interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(interval_seconds.max(1)));
    info!(interval_seconds, "Reconciliation sweep started");

    loop {
        ticker.tick().await;
        match reconciler.repair_unreconciled().await {
            Ok(0) => {}
            Ok(repaired) => info!(repaired, "Reconciliation sweep repaired reservations"),
            Err(e) => error!(error = %e, "Reconciliation sweep pass failed"),
        }
    }
}
