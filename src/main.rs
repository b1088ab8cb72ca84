//! Audit worker: subscribes to good events and batches them into the
//! analytics store.

use std::process::ExitCode;
use std::sync::Arc;

use goods_manager::infrastructure::{AppConfig, FactoryError, LogFormat, ServiceFactory};
use goods_manager::worker::EventBatcher;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Configuration error: {error}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);

    match run(ServiceFactory::new(config)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "Audit worker failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "goods_manager=info,goods_audit_worker=info".into()),
    );
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run(factory: ServiceFactory) -> Result<(), FactoryError> {
    let sink = Arc::new(factory.create_analytics_sink().await?);
    let subscriber = factory.create_subscriber()?;

    let (batcher, ingress) = EventBatcher::new(sink, factory.config().batcher_config());
    let batcher_task = tokio::spawn(batcher.run());

    tracing::info!(topic = %factory.config().event_topic, "Audit worker started");

    let delivery = ingress.clone();
    let subscription = subscriber
        .run(
            move |good| {
                // Rejections are counted and logged by the ingress.
                let _ = delivery.push(good);
            },
            shutdown_signal(),
        )
        .await;

    let dropped = ingress.dropped();
    drop(ingress);

    match batcher_task.await {
        Ok(report) => tracing::info!(
            batches = report.batches_flushed,
            events = report.events_flushed,
            dropped_batches = report.batches_dropped,
            dropped_at_ingress = dropped,
            "Audit worker stopped"
        ),
        Err(error) => tracing::error!(%error, "Audit batcher task failed"),
    }

    subscription.map_err(|error| FactoryError::RedisConnection(error.to_string()))
}

/// Completes on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::warn!(%error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
