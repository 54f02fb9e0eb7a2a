use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scriptgate_amqp::AmqpFrontEnd;
use scriptgate_api::config::{ConfigError, ServiceConfig};
use scriptgate_api::router::build_router;
use scriptgate_api::state::AppState;
use scriptgate_core::dispatcher::Dispatcher;
use scriptgate_core::pool::{ExecutionPool, PoolError};
use scriptgate_core::scripting::powershell::PowerShellEngine;
use scriptgate_events::{EventBus, EventLogger};

const DEFAULT_LOG_FILTER: &str = "scriptgate_api=info,scriptgate_core=info,\
    scriptgate_amqp=info,scriptgate_events=info,tower_http=info";

#[derive(Debug, thiserror::Error)]
enum FatalError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Execution pool failed to start: {0}")]
    Pool(#[from] PoolError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "scriptgate failed");
            ExitCode::FAILURE
        }
    }
}

/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn run() -> Result<(), FatalError> {
    // --- Configuration ---
    let config = ServiceConfig::from_env()?;
    tracing::info!(
        scripts_root = %config.engine.scripts_root.display(),
        executable = %config.engine.executable,
        min_size = config.pool.min_size,
        max_size = ?config.pool.max_size,
        http = config.http.is_some(),
        amqp = config.amqp.is_some(),
        "Loaded service configuration",
    );

    // --- Execution pool ---
    let engine = PowerShellEngine::new(config.engine.clone());
    let pool = Arc::new(ExecutionPool::start(engine, config.pool.clone()).await?);
    let dispatcher = Dispatcher::new(Arc::clone(&pool));

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let logger_handle = tokio::spawn(EventLogger::run(event_bus.subscribe()));

    // Bind before starting the consumer so a bad address fails fast.
    let listener = match &config.http {
        Some(http) => Some(
            tokio::net::TcpListener::bind(&http.listen_addr)
                .await
                .map_err(|source| FatalError::Bind {
                    addr: http.listen_addr.clone(),
                    source,
                })?,
        ),
        None => None,
    };

    // --- AMQP front-end ---
    let cancel = CancellationToken::new();
    let mut amqp_status = None;
    let amqp_handle = config.amqp.clone().map(|amqp| {
        let front_end = AmqpFrontEnd::new(amqp, dispatcher.clone(), Arc::clone(&event_bus));
        amqp_status = Some(front_end.status());
        tokio::spawn(front_end.run(cancel.child_token()))
    });

    // --- HTTP front-end ---
    let served = match (listener, &config.http) {
        (Some(listener), Some(http)) => {
            let mut state = AppState::new(
                dispatcher.clone(),
                http.auth.clone(),
                Arc::clone(&event_bus),
            );
            if let Some(status) = amqp_status {
                state = state.with_amqp_status(status);
            }
            let app = build_router(state, http.request_timeout);

            tracing::info!(addr = %http.listen_addr, auth = http.auth.is_enabled(), "Starting HTTP server");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(FatalError::Serve)
        }
        _ => {
            shutdown_signal().await;
            Ok(())
        }
    };

    // --- Post-shutdown cleanup ---
    tracing::info!("Front-ends stopped accepting work, cleaning up");

    cancel.cancel();
    if let Some(handle) = amqp_handle {
        if tokio::time::timeout(config.shutdown_timeout, handle).await.is_err() {
            tracing::warn!("AMQP front-end did not stop in time");
        }
    }

    if tokio::time::timeout(config.shutdown_timeout, pool.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Execution pool did not drain in time");
    }
    tracing::info!("Execution pool shut down");

    // Dropping every sender closes the broadcast channel and ends the logger.
    drop(dispatcher);
    drop(event_bus);
    match tokio::time::timeout(Duration::from_secs(5), logger_handle).await {
        Ok(Ok(written)) => tracing::info!(written, "Event logger stopped"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Event logger task failed"),
        Err(_) => tracing::warn!("Event logger did not stop in time"),
    }

    tracing::info!("Graceful shutdown complete");
    served
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
