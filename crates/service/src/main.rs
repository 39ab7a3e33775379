//! Saga service entry point.

use channel::InMemoryChannel;
use idempotency::InMemoryIdempotencyGuard;
use participants::{InMemoryOrderStore, InMemoryPaymentStore, OrderCompensator, PaymentCompensator};
use record_store::{InMemoryRecordStore, PostgresRecordStore};
use service::{Config, SagaRuntime};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Load configuration and build the stack
    let config = Config::from_env();
    let channel = InMemoryChannel::new();
    let guard = InMemoryIdempotencyGuard::new();
    let order_store = InMemoryOrderStore::new();
    let payment_store = InMemoryPaymentStore::new();

    let order_compensator =
        OrderCompensator::new(order_store, guard.clone(), config.claim_ttl());
    let payment_compensator =
        PaymentCompensator::new(payment_store, guard, config.claim_ttl());

    // 4. Spawn the orchestration tasks
    tracing::info!(
        scan_interval_ms = config.scan_interval_ms,
        stage_timeout_ms = config.stage_timeout_ms,
        workers = config.consumer_workers,
        durable = config.database_url.is_some(),
        "starting saga service"
    );
    let runtime = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .expect("failed to connect to database");
            let store = PostgresRecordStore::new(pool);
            store.run_migrations().await.expect("migrations failed");
            SagaRuntime::spawn(&config, store, channel, order_compensator, payment_compensator)
        }
        None => SagaRuntime::spawn(
            &config,
            InMemoryRecordStore::new(),
            channel,
            order_compensator,
            payment_compensator,
        ),
    };

    // 5. Run until a signal arrives, then drain
    shutdown_signal().await;
    runtime.shutdown().await;

    tracing::info!("service shut down gracefully");
}
