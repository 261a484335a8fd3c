//! Query Exporter Binary Entry Point
//!
//! Runs the refresh scheduler and the pull endpoint side by side.
//! Core functionality is provided by the `query_exporter` library crate.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use query_exporter::{
    collector::Registry,
    config::{AppConfig, parse_refresh},
    query::{SqliteRunner, SqliteRunnerOptions},
    scheduler::{RegistrationPolicy, Scheduler, SchedulerMetrics},
    server::{AppState, create_router},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Query Exporter - SQL query results as Prometheus metrics
#[derive(Parser, Debug)]
#[command(name = "query-exporter", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "QUERY_EXPORTER_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "QUERY_EXPORTER_BIND")]
    bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(short, long, env = "QUERY_EXPORTER_PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, env = "QUERY_EXPORTER_DATABASE_URL")]
    database_url: Option<String>,

    /// Refresh interval, e.g. 30s or 5m (overrides config file)
    #[arg(long, env = "QUERY_EXPORTER_REFRESH", value_parser = parse_refresh)]
    refresh: Option<Duration>,

    /// Registration failure policy: fatal or retry (overrides config file)
    #[arg(long, env = "QUERY_EXPORTER_REGISTRATION_FAILURE")]
    registration_failure: Option<RegistrationPolicy>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,query_exporter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!(path = %cli.config, "Loading configuration");
    let (mut config, stamp) = AppConfig::load_with_stamp(&cli.config)?;

    // CLI > ENV > config file
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if let Some(refresh) = cli.refresh {
        config.refresh = refresh;
    }
    if let Some(policy) = cli.registration_failure {
        config.registration_failure = policy;
    }
    config.validate()?;

    let addr = config.server.socket_addr()?;
    tracing::info!(
        %addr,
        database = %config.database.url,
        refresh = %humantime::format_duration(config.refresh),
        policy = %config.registration_failure,
        sources = config.queries.len(),
        "Configuration loaded"
    );

    let runner = Arc::new(
        SqliteRunner::connect(
            &config.database.url,
            SqliteRunnerOptions {
                max_connections: config.database.max_connections,
                acquire_timeout: config.database.acquire_timeout,
                create_if_missing: false,
            },
        )
        .await?,
    );

    let registry = Arc::new(Registry::new());
    let metrics = SchedulerMetrics::new(registry.internal())?;
    let scheduler = Scheduler::new(
        config.scheduler_settings(),
        runner.clone(),
        Arc::clone(&registry),
        metrics,
    )
    .with_sources(config.queries.specs())
    .watch_config(stamp);

    let cancel = CancellationToken::new();
    let scheduler_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = scheduler.run(cancel.clone()).await;
            // A fatal scheduler error also stops the server.
            cancel.cancel();
            result
        })
    };

    let app = create_router(AppState { registry });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics available at: http://{}/metrics", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Waiting for the current refresh cycle...");
    let result = scheduler_task.await;
    runner.close().await;

    match result {
        Ok(Ok(())) => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Scheduler stopped with an error");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolve on Ctrl+C, SIGTERM, or when `cancel` fires, then cancel the scheduler.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
        _ = cancel.cancelled() => {
            tracing::info!("Scheduler stopped, shutting down server");
        }
    }

    cancel.cancel();
}
