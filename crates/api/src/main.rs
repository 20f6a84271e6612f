use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use reportbridge_core::config::env_optional;
use reportbridge_core::script::ConfigResolver;
use reportbridge_delivery::DistributionApi;
use reportbridge_engine::EngineApi;
use reportbridge_orchestrator::{Orchestrator, OrchestratorConfig, Watcher};
use reportbridge_session::{JwtSessionConfig, JwtSessionProvider, SessionCache};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reportbridge_api::config::ServerConfig;
use reportbridge_api::router::build_app_router;
use reportbridge_api::state::AppState;

const DEFAULT_LOG_FILTER: &str =
    "reportbridge_api=debug,reportbridge_orchestrator=debug,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let orchestrator_config =
        OrchestratorConfig::from_env().context("Invalid orchestrator configuration")?;
    let session_config = JwtSessionConfig::from_env().context("Invalid session configuration")?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        engine_url = %config.engine_url,
        distribution_url = %config.distribution_url,
        credential_type = %config.credential_type,
        "Loaded server configuration",
    );

    // --- Orchestrator ---
    let mut resolver = ConfigResolver::new(config.credential_type);
    if let Some(path) = &config.password_key_path {
        resolver = resolver.with_password_key(path);
    }
    let sessions = SessionCache::new(Arc::new(JwtSessionProvider::new(session_config)));
    let orchestrator = Orchestrator::new(
        orchestrator_config,
        resolver,
        sessions,
        Arc::new(EngineApi::new(config.engine_url.clone())),
        Arc::new(DistributionApi::new(config.distribution_url.clone())),
    );

    // --- Watcher ---
    // `fatal` fires when the watcher gives up, which also stops the server.
    let watcher_cancel = CancellationToken::new();
    let fatal = CancellationToken::new();
    let watcher_handle = tokio::spawn({
        let watcher = Watcher::new(Arc::clone(&orchestrator));
        let cancel = watcher_cancel.clone();
        let fatal = fatal.clone();
        async move {
            let outcome = watcher.run(cancel).await;
            if outcome.is_err() {
                fatal.cancel();
            }
            outcome
        }
    });

    // --- Router ---
    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state);

    // --- Start server ---
    let host = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(fatal))
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    watcher_cancel.cancel();
    let watcher_outcome = watcher_handle.await.context("Job watcher task panicked")?;

    orchestrator.shutdown().await;
    tracing::info!("Graceful shutdown complete");

    watcher_outcome.context("Job watcher failed")
}

/// Install the global subscriber; `LOG_FORMAT=json` selects JSON output.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = env_optional("LOG_FORMAT").is_some_and(|format| format.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT, SIGTERM (on Unix) or a fatal watcher failure.
async fn shutdown_signal(fatal: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
        () = fatal.cancelled() => {
            tracing::error!("Job watcher stopped, shutting down");
        }
    }
}
