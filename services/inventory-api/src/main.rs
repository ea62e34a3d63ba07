//! fleetsync inventory server
//!
//! Accepts machine registrations and component reports from agents, and
//! reconciles each report against the stored inventory.

use anyhow::{Context, Result};
use fleetsync_server::{
    api,
    config::Config,
    db::Database,
    state::AppState,
};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(config: &Config) {
    // RUST_LOG wins over FLEETSYNC_LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Resolves on Ctrl-C or SIGTERM. In-flight syncs then either finish or are
/// dropped, and a dropped sync rolls back.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    info!(
        listen_addr = %config.listen_addr,
        environment = %config.environment,
        sync_timeout_secs = config.sync.timeout.as_secs(),
        deactivation_policy = ?config.sync.deactivation_policy,
        "Starting fleetsync inventory server"
    );

    let db = Database::connect(&config.database)
        .await
        .context("failed to connect to database")?;

    if config.dev_mode {
        db.run_migrations()
            .await
            .context("failed to run migrations")?;
    }

    let state = AppState::new(db, config.sync.clone(), config.environment.clone());
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("fleetsync inventory server stopped");
    Ok(())
}
