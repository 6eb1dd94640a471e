use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gather_core::auth::JwtVerifier;
use gather_core::store::{MemoryMessageStore, MemoryNotificationStore};
use gather_core::AppState;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gather=info")),
        )
        .init();

    let args = cli::Args::parse();
    let mut config = config::Config::load(&args.config)?;

    // CLI --bind overrides config file
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    let state = AppState::new(
        config.gateway.to_gateway_config(),
        Arc::new(JwtVerifier::new(config.auth.jwt_secret.clone())),
        Arc::new(MemoryMessageStore::new()),
        Arc::new(MemoryNotificationStore::new()),
    );
    let shutdown_notify = state.shutdown.clone();

    let app = gather_gateway::gateway_router().with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(
        bind_address = %config.server.bind_address,
        max_connections = config.gateway.max_global_connections,
        "gateway listening"
    );

    // Graceful shutdown on ctrl-c or an in-process shutdown request.
    let shutdown_signal = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down (ctrl-c)...");
            }
            _ = shutdown_notify.notified() => {
                tracing::info!("Shutting down (requested)...");
            }
        }
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}
