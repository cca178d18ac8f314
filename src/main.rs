// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Quillmate auth server
//!
//! Hosts one auth core per browser context in front of the identity service
//! and serves the session, sign-in and recovery endpoints the web app uses.

use quillmate_auth::{
    backend::{BackendFactory, GoTrueBackend, IdentityBackend, MemoryIdentityServer},
    config::{BackendKind, Config},
    services::ContextRegistry,
    AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often idle browser contexts are swept.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, backend = ?config.backend, "Starting Quillmate auth server");

    let factory = backend_factory(&config)?;

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        contexts: ContextRegistry::new(factory),
    });

    spawn_eviction(state.clone());

    // Build router
    let app = quillmate_auth::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// One backend client per browser context.
fn backend_factory(config: &Config) -> anyhow::Result<BackendFactory> {
    match config.backend {
        BackendKind::GoTrue => {
            // Connection pool is shared; sessions are not.
            let http = GoTrueBackend::http_client(config)?;
            let config = config.clone();
            tracing::info!(url = %config.identity_url, "Using GoTrue identity service");
            Ok(Arc::new(move || {
                Arc::new(GoTrueBackend::new(http.clone(), &config)) as Arc<dyn IdentityBackend>
            }))
        }
        BackendKind::Memory => {
            tracing::warn!("Using in-memory identity service; accounts are lost on restart");
            let server = MemoryIdentityServer::new();
            Ok(Arc::new(move || server.client() as Arc<dyn IdentityBackend>))
        }
    }
}

/// Periodically drop browser contexts that have gone quiet.
fn spawn_eviction(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVICTION_INTERVAL);
        loop {
            interval.tick().await;
            let evicted = state.contexts.evict_idle(state.config.context_idle);
            if evicted > 0 {
                tracing::info!(
                    evicted,
                    remaining = state.contexts.len(),
                    "Evicted idle browser contexts"
                );
            }
        }
    });
}

/// Initialize structured JSON logging.
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quillmate_auth=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
