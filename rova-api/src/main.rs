use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rova_api::{app, state::AppState, worker};
use rova_booking::AvailabilityGuard;
use rova_core::{Car, CarStore, PaymentSessionStore, ReservationStore};
use rova_payment::{
    GatewayConfig, LogMailTransport, NotificationDispatcher, PaymentSessionManager,
    SettlementReconciler, SignatureCodec,
};
use rova_store::{Config, MemoryStore, PgStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rova_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");
    tracing::info!("Starting Rova API on port {}", config.server.port);

    let (cars, reservations, sessions): (
        Arc<dyn CarStore>,
        Arc<dyn ReservationStore>,
        Arc<dyn PaymentSessionStore>,
    ) = match config.store.backend.as_str() {
        "postgres" => {
            let url = config
                .store
                .url
                .as_deref()
                .expect("store.url is required for the postgres backend");
            let store = PgStore::connect(url)
                .await
                .expect("Failed to connect to Postgres");
            store.migrate().await.expect("Failed to run migrations");
            let store = Arc::new(store);
            (store.clone(), store.clone(), store)
        }
        _ => {
            tracing::info!("Using in-memory store");
            let store = Arc::new(MemoryStore::new());
            seed_demo_fleet(store.as_ref()).await;
            (store.clone(), store.clone(), store)
        }
    };

    let codec = Arc::new(SignatureCodec::new(&config.gateway.secret));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(LogMailTransport),
        config.notify.from_address.clone(),
        config.notify.max_retries,
        Duration::from_millis(config.notify.retry_delay_ms),
    ));

    let guard = Arc::new(AvailabilityGuard::new(cars.clone(), reservations.clone()));
    let payments = Arc::new(PaymentSessionManager::new(
        reservations.clone(),
        sessions.clone(),
        codec.clone(),
        GatewayConfig {
            merchant_code: config.gateway.merchant_code.clone(),
            pay_url: config.gateway.pay_url.clone(),
            return_url: config.gateway.return_url.clone(),
            currency: config.gateway.currency.clone(),
            locale: config.gateway.locale.clone(),
        },
    ));
    let reconciler = Arc::new(SettlementReconciler::new(
        sessions,
        reservations,
        codec,
        dispatcher,
    ));

    tokio::spawn(worker::run_reconciliation_sweep(
        reconciler.clone(),
        config.sweep.interval_seconds,
    ));

    let app_state = AppState {
        guard,
        payments,
        reconciler,
        cars,
        client_result_url: config.gateway.client_result_url.clone(),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// The in-memory backend starts empty; give local runs something to book.
async fn seed_demo_fleet(store: &MemoryStore) {
    let demo = [
        Car::new("Toyota Vios".to_string(), "51H-123.45".to_string(), 100_000, 0),
        Car::new("Kia Morning".to_string(), "51G-678.90".to_string(), 80_000, 10),
        Car::new("Mazda CX-5".to_string(), "30A-555.12".to_string(), 150_000, 5),
    ];
    for car in &demo {
        if let Err(e) = store.insert_car(car).await {
            tracing::error!(error = %e, "Failed to seed demo car");
        }
    }
    tracing::info!(count = demo.len(), "Seeded demo fleet for in-memory store");
}
