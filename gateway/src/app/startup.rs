//! Process startup: configuration, database, state and the listening server.

use core::net::{IpAddr, SocketAddr};
use std::path::Path;

use eyre::WrapErr as _;
use tokio::{net, signal};

use crate::{
    app::{AppState, db},
    config::{self, ResolvedConfig},
    http,
};

/// Creates a future that resolves when a shutdown signal is received.
pub(crate) async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler, only Ctrl-C stops the server");
                drop(signal::ctrl_c().await);
            }
        }
    }
    #[cfg(not(unix))]
    {
        drop(signal::ctrl_c().await);
    }
}

/// Loads and validates the configuration, opens the database and builds the state.
#[tracing::instrument(skip_all)]
async fn initialize_state(config_path: &Path) -> eyre::Result<(AppState, ResolvedConfig)> {
    let config = config::load_resolved(config_path).await?;
    tracing::info!(
        environment = ?config.environment,
        db = %config.db_path.display(),
        session_days = config.session.lifetime.num_days(),
        "Configuration loaded"
    );

    let pool = db::init(&config.db_path)
        .await
        .wrap_err_with(|| format!("Failed to open database at {}", config.db_path.display()))?;
    tracing::info!("Database ready");

    let state = AppState::build(&config, pool)?;
    Ok((state, config))
}

/// Runs the gateway until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the database cannot be opened,
/// or the server cannot bind.
pub(crate) async fn start(
    config_path: &str,
    port_override: Option<u16>,
    bind_override: Option<&str>,
) -> eyre::Result<()> {
    tracing::info!("Starting HTTP server...");

    let (app_state, config) = initialize_state(Path::new(config_path)).await?;

    // Apply optional overrides from CLI/tests
    let listen_port = port_override.unwrap_or(config.server.port);
    let bind_str = bind_override.unwrap_or(&config.server.bind);
    let listen_ip: IpAddr = bind_str
        .parse()
        .wrap_err_with(|| format!("Invalid bind address {bind_str:?}"))?;
    let addr = SocketAddr::from((listen_ip, listen_port));

    let app = http::create_app(app_state);
    let listener = net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            tracing::info!("Received shutdown, shutting down");
        })
        .await
        .wrap_err("Server error")
}
