//! Configuration loading utilities for the gateway.
//!
//! Reads the TOML file (if any), layers the well-known environment variables on top and
//! validates the result.

use alloc::sync::Arc;
use std::{env, io, path::Path};

use eyre::WrapErr as _;
use secrecy::SecretString;
use tokio::fs;
use tracing::warn;

use crate::config::{GatewayConfig, ResolvedConfig};

/// Reads and parses the gateway config from a TOML file.
///
/// A missing file is not an error: the defaults are used so a deployment can be configured
/// purely through the environment.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed.
pub(crate) async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<GatewayConfig> {
    let path_ref = path.as_ref();
    let content = match fs::read_to_string(path_ref).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path_ref.display(), "Config file not found, using defaults and environment");
            return Ok(GatewayConfig::default());
        }
        Err(e) => {
            return Err(e).wrap_err(format!(
                "Failed to read config file at: {}",
                path_ref.display()
            ));
        }
    };
    let config: GatewayConfig = toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path_ref.display()
    ))?;
    Ok(config)
}

/// Overrides file values with environment variables, looked up through `lookup`.
///
/// Recognised: `SESSION_SECRET`, `KAKAO_CLIENT_ID`, `KAKAO_CLIENT_SECRET`,
/// `KAKAO_REDIRECT_URI` and `SOUVENIR_ENV`.
///
/// # Errors
///
/// Returns an error if `SOUVENIR_ENV` names an unknown environment.
pub fn apply_env_overrides(
    config: &mut GatewayConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> eyre::Result<()> {
    let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(secret) = lookup("SESSION_SECRET") {
        config.session.secret = Some(Arc::new(SecretString::from(secret)));
    }
    if let Some(id) = lookup("KAKAO_CLIENT_ID") {
        config.kakao.client_id = Some(id);
    }
    if let Some(secret) = lookup("KAKAO_CLIENT_SECRET") {
        config.kakao.client_secret = Some(Arc::new(SecretString::from(secret)));
    }
    if let Some(uri) = lookup("KAKAO_REDIRECT_URI") {
        config.kakao.redirect_uri = Some(uri);
    }
    if let Some(environment) = lookup("SOUVENIR_ENV") {
        config.environment = environment
            .parse()
            .wrap_err("Invalid SOUVENIR_ENV value")?;
    }
    Ok(())
}

/// Loads, overrides from the process environment and validates the configuration.
///
/// # Errors
///
/// Returns an error if the file cannot be parsed or the resulting configuration is incomplete.
pub async fn load_resolved<P: AsRef<Path>>(path: P) -> eyre::Result<ResolvedConfig> {
    let path_ref = path.as_ref();
    let mut config = load(path_ref).await?;
    apply_env_overrides(&mut config, |key| env::var(key).ok())?;
    let resolved = config
        .resolve(path_ref)
        .wrap_err("Invalid gateway configuration")?;
    Ok(resolved)
}
