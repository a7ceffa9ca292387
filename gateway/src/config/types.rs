//! Configuration data types for the gateway.
//!
//! [`GatewayConfig`] mirrors the TOML file. Everything optional in the file is checked
//! and converted by [`GatewayConfig::resolve`] into a [`ResolvedConfig`], which is what the
//! rest of the crate consumes.

use alloc::sync::Arc;
use core::{str::FromStr, time::Duration};
use std::path::{Component, Path, PathBuf};

use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use url::Url;

use crate::config::ConfigError;

/// Minimum accepted length of the session signing secret, in characters.
pub const MIN_SECRET_LEN: usize = 32;

/// Upper bound on `[session].lifetime_days`.
pub const MAX_LIFETIME_DAYS: u32 = 365;

/// Deployment environment. Drives cookie flags (`Secure`, `SameSite`).
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            _ => Err(ConfigError::UnknownEnvironment(s.to_string())),
        }
    }
}

/// HTTP server binding configuration section.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// TCP port for the gateway.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address for the HTTP listener.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

/// Location of the `SQLite` credential store.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// Relative paths are resolved relative to the config file. `:memory:` is kept as is.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// HS256 signing secret, at least [`MIN_SECRET_LEN`] characters.
    #[serde(default)]
    pub secret: Option<Arc<SecretString>>,
    #[serde(default = "default_lifetime_days")]
    pub lifetime_days: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            lifetime_days: default_lifetime_days(),
        }
    }
}

/// Kakao OAuth client registration and endpoints.
#[derive(Debug, Deserialize, Clone)]
pub struct KakaoConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<Arc<SecretString>>,
    /// Must match the redirect URI registered with Kakao exactly.
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_user_info_url")]
    pub user_info_url: String,
    /// Timeout applied to each server-to-server call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for KakaoConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            scope: default_scope(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            user_info_url: default_user_info_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Root config structure as read from the TOML file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub kakao: KakaoConfig,
}

/// Validated session settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub secret: Arc<SecretString>,
    pub lifetime: chrono::Duration,
}

/// Validated Kakao settings.
#[derive(Debug, Clone)]
pub struct KakaoSettings {
    pub client_id: String,
    pub client_secret: Arc<SecretString>,
    pub redirect_uri: Url,
    pub scope: String,
    pub authorize_url: Url,
    pub token_url: Url,
    pub user_info_url: Url,
    pub timeout: Duration,
}

/// Configuration after validation; constructing one proves every secret is present.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub db_path: PathBuf,
    pub session: SessionSettings,
    pub kakao: KakaoSettings,
}

impl GatewayConfig {
    /// Validates the configuration and resolves the database path against `config_path`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the session secret or any Kakao credential is missing,
    /// the secret is too short, or one of the URLs is not an absolute http(s) URL.
    pub fn resolve(self, config_path: &Path) -> Result<ResolvedConfig, ConfigError> {
        let secret = self.session.secret.ok_or(ConfigError::MissingSecret)?;
        if secret.expose_secret().chars().count() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret {
                min: MIN_SECRET_LEN,
            });
        }
        if !(1..=MAX_LIFETIME_DAYS).contains(&self.session.lifetime_days) {
            return Err(ConfigError::LifetimeOutOfRange {
                max: MAX_LIFETIME_DAYS,
            });
        }

        let kakao = self.kakao;
        let client_id = kakao
            .client_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::MissingProvider("client_id"))?;
        let client_secret = kakao
            .client_secret
            .filter(|s| !s.expose_secret().is_empty())
            .ok_or(ConfigError::MissingProvider("client_secret"))?;
        let redirect_uri = kakao
            .redirect_uri
            .ok_or(ConfigError::MissingProvider("redirect_uri"))?;

        Ok(ResolvedConfig {
            environment: self.environment,
            server: self.server,
            db_path: resolve_config_relative_paths(config_path, &self.db.path),
            session: SessionSettings {
                secret,
                lifetime: chrono::Duration::days(i64::from(self.session.lifetime_days)),
            },
            kakao: KakaoSettings {
                client_id,
                client_secret,
                redirect_uri: parse_http_url("redirect_uri", &redirect_uri)?,
                scope: kakao.scope,
                authorize_url: parse_http_url("authorize_url", &kakao.authorize_url)?,
                token_url: parse_http_url("token_url", &kakao.token_url)?,
                user_info_url: parse_http_url("user_info_url", &kakao.user_info_url)?,
                timeout: Duration::from_secs(kakao.timeout_secs.max(1)),
            },
        })
    }
}

fn parse_http_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ConfigError::UnsupportedUrl(field));
    }
    Ok(url)
}

const fn default_port() -> u16 {
    3000
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_db_path() -> String {
    "./souvenir.db".to_string()
}

const fn default_lifetime_days() -> u32 {
    7
}

fn default_scope() -> String {
    "profile_nickname,profile_image,account_email".to_string()
}

fn default_authorize_url() -> String {
    "https://kauth.kakao.com/oauth/authorize".to_string()
}

fn default_token_url() -> String {
    "https://kauth.kakao.com/oauth/token".to_string()
}

fn default_user_info_url() -> String {
    "https://kapi.kakao.com/v2/user/me".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

/// Resolves a path to an absolute one.
///
/// If the path is absolute, returns it as-is. If relative, joins it with the
/// config file's parent directory and normalizes the result to remove redundant
/// components like `./`.
#[must_use]
pub fn resolve_config_relative_paths(config_path: &Path, relative_path: &str) -> PathBuf {
    let path = Path::new(relative_path);
    let resolved = if path.is_absolute() || relative_path == ":memory:" {
        path.to_path_buf()
    } else {
        config_path
            .parent()
            .map_or_else(|| path.to_path_buf(), |d| d.join(path))
    };

    // We can't use canonicalize() because the file might not exist yet
    normalize_path(&resolved)
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        use Component as C;
        match component {
            C::Normal(c) => result.push(c),
            C::ParentDir => {
                result.pop();
            }
            C::CurDir => {}
            C::RootDir | C::Prefix(_) => result.push(component),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> Option<Arc<SecretString>> {
        Some(Arc::new(SecretString::from(s)))
    }

    fn complete() -> GatewayConfig {
        GatewayConfig {
            session: SessionConfig {
                secret: secret("0123456789abcdef0123456789abcdef"),
                ..SessionConfig::default()
            },
            kakao: KakaoConfig {
                client_id: Some("client".to_string()),
                client_secret: secret("client-secret"),
                redirect_uri: Some("https://shop.example/api/auth/callback/kakao".to_string()),
                ..KakaoConfig::default()
            },
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn resolves_complete_config() {
        let resolved = complete().resolve(Path::new("/etc/souvenir/souvenir.toml")).unwrap();
        assert_eq!(resolved.db_path, PathBuf::from("/etc/souvenir/souvenir.db"));
        assert_eq!(resolved.session.lifetime, chrono::Duration::days(7));
        assert_eq!(resolved.kakao.timeout, Duration::from_secs(10));
        assert_eq!(
            resolved.kakao.authorize_url.as_str(),
            "https://kauth.kakao.com/oauth/authorize"
        );
    }

    #[test]
    fn missing_secret_is_a_configuration_error() {
        let mut cfg = complete();
        cfg.session.secret = None;
        assert!(matches!(
            cfg.resolve(Path::new("souvenir.toml")),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn lifetime_is_bounded() {
        for days in [0, MAX_LIFETIME_DAYS + 1, 4_000_000_000] {
            let mut cfg = complete();
            cfg.session.lifetime_days = days;
            assert!(matches!(
                cfg.resolve(Path::new("souvenir.toml")),
                Err(ConfigError::LifetimeOutOfRange {
                    max: MAX_LIFETIME_DAYS
                })
            ));
        }

        let mut cfg = complete();
        cfg.session.lifetime_days = MAX_LIFETIME_DAYS;
        assert!(cfg.resolve(Path::new("souvenir.toml")).is_ok());
    }

    #[test]
    fn short_secret_is_rejected() {
        let mut cfg = complete();
        cfg.session.secret = secret("too-short");
        assert!(matches!(
            cfg.resolve(Path::new("souvenir.toml")),
            Err(ConfigError::WeakSecret { min: MIN_SECRET_LEN })
        ));
    }

    #[test]
    fn missing_provider_credentials_are_rejected() {
        let mut cfg = complete();
        cfg.kakao.client_secret = None;
        assert!(matches!(
            cfg.resolve(Path::new("souvenir.toml")),
            Err(ConfigError::MissingProvider("client_secret"))
        ));

        let mut cfg = complete();
        cfg.kakao.redirect_uri = Some("not a url".to_string());
        assert!(matches!(
            cfg.resolve(Path::new("souvenir.toml")),
            Err(ConfigError::InvalidUrl {
                field: "redirect_uri",
                ..
            })
        ));
    }

    #[test]
    fn environment_parsing() {
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("Dev".parse::<Environment>().unwrap(), Environment::Development);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn memory_db_path_is_kept() {
        assert_eq!(
            resolve_config_relative_paths(Path::new("/srv/souvenir.toml"), ":memory:"),
            PathBuf::from(":memory:")
        );
        assert_eq!(
            resolve_config_relative_paths(Path::new("/srv/conf/souvenir.toml"), "../data/s.db"),
            PathBuf::from("/srv/data/s.db")
        );
    }
}
