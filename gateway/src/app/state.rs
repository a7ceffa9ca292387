//! Shared application state handed to every handler.

use alloc::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use eyre::WrapErr as _;

use crate::{
    app::db::{DbPool, SqliteCredentialStore},
    config::ResolvedConfig,
    http::auth::{
        cookies::{CookiePolicy, key_from_session_secret},
        flow::LoginFlow,
        kakao::KakaoClient,
        state_guard::StateGuard,
        token::SessionCodec,
    },
};

pub(crate) type KakaoLoginFlow = LoginFlow<KakaoClient, SqliteCredentialStore>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub codec: Arc<SessionCodec>,
    pub cookies: CookiePolicy,
    /// Signs the `oauth_state` and `return_url` cookies.
    pub cookie_key: Key,
    pub store: Arc<SqliteCredentialStore>,
    pub login: Arc<KakaoLoginFlow>,
}

impl FromRef<AppState> for Key {
    fn from_ref(input: &AppState) -> Self {
        input.cookie_key.clone()
    }
}

impl AppState {
    /// Wires the auth core together from a validated configuration and an open pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing keys cannot be derived or the HTTP client for
    /// Kakao cannot be built.
    pub fn build(config: &ResolvedConfig, pool: DbPool) -> eyre::Result<Self> {
        let cookies = CookiePolicy::for_environment(config.environment);
        let codec = Arc::new(
            SessionCodec::new(&config.session.secret, config.session.lifetime)
                .wrap_err("Failed to set up session signing")?,
        );
        let cookie_key = key_from_session_secret(&config.session.secret)
            .wrap_err("Failed to derive cookie key")?;
        let store = Arc::new(SqliteCredentialStore::new(pool));
        let provider =
            KakaoClient::new(config.kakao.clone()).wrap_err("Failed to build Kakao client")?;
        let login = Arc::new(LoginFlow::new(
            provider,
            store.clone(),
            codec.clone(),
            Arc::new(StateGuard::new(cookies)),
            cookies,
        ));

        Ok(Self {
            codec,
            cookies,
            cookie_key,
            store,
            login,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use alloc::sync::Arc;
    use core::time::Duration;
    use std::path::{Path, PathBuf};

    use secrecy::SecretString;
    use url::Url;

    use super::AppState;
    use crate::{
        app::db,
        config::{Environment, KakaoSettings, ResolvedConfig, ServerConfig, SessionSettings},
    };

    pub(crate) const TEST_SECRET: &str = "test-secret-test-secret-test-secret!";

    /// Config whose Kakao endpoints point at a closed local port.
    pub(crate) fn resolved_config() -> ResolvedConfig {
        let unreachable = |path: &str| Url::parse(&format!("http://127.0.0.1:9{path}")).unwrap();
        ResolvedConfig {
            environment: Environment::Test,
            server: ServerConfig::default(),
            db_path: PathBuf::from(":memory:"),
            session: SessionSettings {
                secret: Arc::new(SecretString::from(TEST_SECRET)),
                lifetime: chrono::Duration::days(7),
            },
            kakao: KakaoSettings {
                client_id: "test-client".to_owned(),
                client_secret: Arc::new(SecretString::from("test-client-secret")),
                redirect_uri: Url::parse("http://localhost:3000/api/auth/callback/kakao")
                    .unwrap(),
                scope: "profile_nickname,profile_image,account_email".to_owned(),
                authorize_url: Url::parse("https://kauth.kakao.com/oauth/authorize").unwrap(),
                token_url: unreachable("/oauth/token"),
                user_info_url: unreachable("/v2/user/me"),
                timeout: Duration::from_secs(1),
            },
        }
    }

    pub(crate) async fn app_state() -> AppState {
        app_state_with_pool().await.0
    }

    /// Also hands back the pool, for tests that edit rows directly.
    pub(crate) async fn app_state_with_pool() -> (AppState, db::DbPool) {
        let pool = db::init(Path::new(":memory:")).await.unwrap();
        let state = AppState::build(&resolved_config(), pool.clone()).unwrap();
        (state, pool)
    }
}
