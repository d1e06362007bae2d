use std::sync::Arc;

use edu_hub::{
    AppState,
    backend::{InMemoryBackend, SupabaseClient},
    config::{AppConfig, BackendKind, Env},
    create_router,
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Entry point: configuration, logging, backend, session store, then the HTTP server.
#[tokio::main]
async fn main() {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging Filter Setup
    // RUST_LOG wins; otherwise debug for this crate and request-level logs from tower-http.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "edu_hub=debug,tower_http=info".into());

    // 3. Pretty logs locally, JSON in production.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 4. Backend Selection
    // The refresh task handle is kept so it can be stopped on the way out.
    let (state, refresher) = match config.backend {
        BackendKind::Supabase => {
            let client = Arc::new(SupabaseClient::new(&config));
            let refresher = client.spawn_auto_refresh();
            tracing::info!(url = %config.supabase_url, "using Supabase backend");
            (AppState::new(client, config.clone()), Some(refresher))
        }
        BackendKind::Memory => {
            tracing::warn!("using the in-memory demo backend; nothing is persisted");
            let backend = Arc::new(InMemoryBackend::demo());
            (AppState::new(backend, config.clone()), None)
        }
    };

    // 5. Session Store Initialization
    // Registers the session listener, restores any stored session and resolves its role
    // before the first request is served.
    state.session.initialize().await;
    let snapshot = state.session.snapshot();
    match &snapshot.identity {
        Some(identity) => {
            tracing::info!(email = %identity.email, role = ?snapshot.role(), "restored session")
        }
        None => tracing::info!("no active session; sign in at POST /login"),
    }

    // 6. Router and Server Startup
    let session = state.session.clone();
    let app = create_router(state);

    let listener = match TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %config.bind_addr, error = %e, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on {}", config.bind_addr);
    tracing::info!(
        "API Documentation (Swagger UI) available at: http://{}/swagger-ui",
        config.bind_addr
    );

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    // 7. Teardown
    session.shutdown();
    if let Some(refresher) = refresher {
        refresher.abort();
    }
    tracing::info!("shut down cleanly");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
