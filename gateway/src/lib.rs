//! Library entry for the `souvenir_gateway` crate.
//!
//! Exposes `inner_main` so the workspace-level shim binary can call into the gateway logic.
//!
//! The gateway owns the session/auth core of the souvenir storefront: Kakao OAuth login,
//! signed session cookies and the per-request gatekeeper that decides who may see which page.
#![cfg_attr(
    test,
    expect(clippy::unwrap_used, reason = "This is not problematic in tests",)
)]

extern crate alloc;
extern crate core;

pub mod app;
pub mod cli;
pub mod config;
pub mod http;

use std::process;
use std::sync::Once;

use eyre::Result;
use tracing::{Instrument as _, info};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use cli::{Cli, LogFormat};

static INIT_TRACING: Once = Once::new();

fn init_tracing(log_format: LogFormat) {
    INIT_TRACING.call_once(move || {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_timer(ChronoLocal::rfc_3339());

        match log_format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}

/// The gateway's main function; can be called from a shim binary.
///
/// # Errors
///
/// Returns an error if the configuration is missing or invalid, the database cannot be
/// opened, or the server fails to bind.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    init_tracing(invocation.log_format);

    let startup_span = tracing::info_span!(
        "gateway.startup",
        config = %invocation.config,
        pid = process::id(),
        version = env!("CARGO_PKG_VERSION")
    );

    info!(parent: &startup_span, "Starting gateway");

    app::start(
        &invocation.config,
        invocation.port,
        invocation.bind.as_deref(),
    )
    .instrument(startup_span)
    .await
}
