//! Orchestrator entry point.

use std::sync::Arc;
use std::time::Duration;

use event_log::PostgresEventLog;
use message_bus::{MessageBus, MessageHandler, NatsBus};
use orchestrator::{Config, Orchestrator, OrchestratorHandler};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const CONNECT_ATTEMPTS: u32 = 30;
const CONNECT_BACKOFF: Duration = Duration::from_secs(2);

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

async fn connect_database(config: &Config) -> Result<PgPool, sqlx::Error> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        match PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if attempt == CONNECT_ATTEMPTS => return Err(e),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "waiting for database");
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
        }
    }
    unreachable!("retry loop always returns")
}

async fn connect_bus(config: &Config) -> Result<NatsBus, message_bus::BusError> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        match NatsBus::connect(&config.nats_url).await {
            Ok(bus) => return Ok(bus),
            Err(e) if attempt == CONNECT_ATTEMPTS => return Err(e),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "waiting for message bus");
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
        }
    }
    unreachable!("retry loop always returns")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = prometheus_builder
        .with_http_listener(std::net::SocketAddr::from(([0, 0, 0, 0], config.metrics_port)))
        .install()
    {
        tracing::error!(error = %e, "failed to install Prometheus recorder");
        std::process::exit(1);
    }

    let pool = match connect_database(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "could not reach the database");
            std::process::exit(1);
        }
    };
    let event_log = PostgresEventLog::new(pool);
    if let Err(e) = event_log.run_migrations().await {
        tracing::error!(error = %e, "migrations failed");
        std::process::exit(1);
    }

    let bus = match connect_bus(&config).await {
        Ok(bus) => bus,
        Err(e) => {
            tracing::error!(error = %e, "could not reach the message bus");
            std::process::exit(1);
        }
    };

    let engine = Arc::new(Orchestrator::new(
        event_log,
        bus.clone(),
        config.topics.clone(),
    ));
    let handler: Arc<dyn MessageHandler> = Arc::new(OrchestratorHandler::new(engine));

    let topics = config.topics.orchestrator_topics();
    tracing::info!(group = %config.group, ?topics, "orchestrator consuming");

    tokio::select! {
        result = bus.consume(topics, &config.group, handler) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "consumer stopped");
                std::process::exit(1);
            }
        }
        () = shutdown_signal() => {}
    }

    tracing::info!("orchestrator shut down gracefully");
}
