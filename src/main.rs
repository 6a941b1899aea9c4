use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use dispatch_engine::api;
use dispatch_engine::config::{Config, LogFormat};
use dispatch_engine::error::AppError;
use dispatch_engine::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    let shared_state = Arc::new(AppState::new(
        config.dispatch.clone(),
        config.event_buffer_size,
    ));

    shared_state.engine.start_supervisor().await?;

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        max_attempts = config.dispatch.max_attempts,
        acceptance_timeout_secs = config.dispatch.acceptance_timeout.as_secs(),
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    shared_state.engine.stop_supervisor().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
