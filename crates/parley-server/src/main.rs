//! Parley server binary — the main entry point for the Parley platform.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, the background stale-run sweeper, and graceful shutdown
//! on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;

use parley_engine::{EngineSettings, SessionEngine};
use parley_provider::{
    HttpProviderClient, HttpProviderSettings, ProviderClient, ScriptedProvider,
};
use parley_server::{app, background, config, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = parley_db::create_pool(
        &config.database.path,
        parley_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms.into(),
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = parley_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Wire the provider client
    let provider: Arc<dyn ProviderClient> = if config.provider.scripted {
        tracing::warn!("using the scripted provider; external calls are simulated");
        Arc::new(ScriptedProvider::new())
    } else {
        Arc::new(HttpProviderClient::new(HttpProviderSettings {
            base_url: config.provider.base_url.clone(),
            api_key: config.provider.api_key.clone(),
            timeout_ms: config.provider.timeout_ms,
            max_retries: config.provider.max_retries,
        }))
    };

    let engine = Arc::new(SessionEngine::new(
        pool.clone(),
        provider,
        EngineSettings {
            max_turns: config.engine.max_turns,
            default_concurrency_ceiling: config.engine.default_concurrency_ceiling,
            staleness_seconds: config.engine.staleness_seconds,
            callback_base_url: config.server.public_url.clone(),
            ..EngineSettings::default()
        },
    ));

    // Start the stale-run sweeper
    tokio::spawn(background::start_sweep_task(
        Arc::clone(&engine),
        config.engine.sweep_interval_seconds,
    ));

    // Build application
    let app = app(AppState { pool, engine });
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting parley server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("parley server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
