//! Kakao login as an explicit state machine.
//!
//! [`LoginFlow`] never produces HTTP responses itself. Every step ends in a
//! [`LoginRedirect`] value that the handlers in [`crate::http::login`] turn into one.

use alloc::sync::Arc;

use axum_extra::extract::cookie::SignedCookieJar;
use serde::Deserialize;
use url::Url;

use crate::{
    app::db::CredentialStore,
    http::auth::{
        cookies::CookiePolicy,
        gatekeeper::{HOME_PATH, LOGIN_PATH, NICKNAME_SETUP_PATH},
        kakao::IdentityProvider,
        return_url,
        state_guard::StateGuard,
        token::{IssuedSession, SessionCodec},
    },
};

/// Where a login attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    Idle,
    RedirectingToProvider,
    AwaitingCallback,
    ExchangingCode,
    FetchingProfile,
    UpsertingAccount,
    SessionIssued,
    RedirectHome,
    RedirectNicknameSetup,
}

/// Machine-readable reason attached to `/login?error=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginErrorCode {
    InvalidParams,
    InvalidState,
    TokenExchangeFailed,
    UserInfoFetchFailed,
    SessionCreationFailed,
    InitFailed,
    KakaoError,
    SessionExpired,
}

impl LoginErrorCode {
    pub const ALL: [Self; 8] = [
        Self::InvalidParams,
        Self::InvalidState,
        Self::TokenExchangeFailed,
        Self::UserInfoFetchFailed,
        Self::SessionCreationFailed,
        Self::InitFailed,
        Self::KakaoError,
        Self::SessionExpired,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::InvalidState => "invalid_state",
            Self::TokenExchangeFailed => "token_exchange_failed",
            Self::UserInfoFetchFailed => "user_info_fetch_failed",
            Self::SessionCreationFailed => "session_creation_failed",
            Self::InitFailed => "init_failed",
            Self::KakaoError => "kakao_error",
            Self::SessionExpired => "session_expired",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    /// Message shown on the login page.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidParams => "잘못된 접근입니다. 다시 시도해주세요.",
            Self::InvalidState => "인증 과정에 문제가 발생했습니다. 다시 로그인해주세요.",
            Self::TokenExchangeFailed => "카카오 인증에 실패했습니다. 잠시 후 다시 시도해주세요.",
            Self::UserInfoFetchFailed => "카카오 사용자 정보를 가져오는 데 실패했습니다.",
            Self::SessionCreationFailed => "로그인에 실패했습니다. 문제가 지속되면 문의해주세요.",
            Self::InitFailed => "로그인 초기화에 실패했습니다. 잠시 후 다시 시도해주세요.",
            Self::KakaoError => "카카오 로그인이 취소되었거나 실패했습니다.",
            Self::SessionExpired => "세션이 만료되었습니다. 다시 로그인해주세요.",
        }
    }
}

/// Message for codes this gateway does not know.
pub const UNKNOWN_ERROR_MESSAGE: &str = "알 수 없는 오류가 발생했습니다. 다시 시도해주세요.";

/// Outcome of a flow step, before it becomes an HTTP redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginRedirect {
    Provider(Url),
    Home,
    NicknameSetup,
    ReturnTo(String),
    Login(LoginErrorCode),
}

impl LoginRedirect {
    #[must_use]
    pub fn target(&self) -> String {
        match *self {
            Self::Provider(ref url) => url.to_string(),
            Self::Home => HOME_PATH.to_owned(),
            Self::NicknameSetup => NICKNAME_SETUP_PATH.to_owned(),
            Self::ReturnTo(ref path) => path.clone(),
            Self::Login(code) => format!("{LOGIN_PATH}?error={}", code.as_str()),
        }
    }
}

/// Query parameters Kakao sends to the callback route.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug)]
pub struct CallbackOutcome {
    /// Set only when a session was issued.
    pub session: Option<IssuedSession>,
    pub redirect: LoginRedirect,
}

impl CallbackOutcome {
    const fn failed(code: LoginErrorCode) -> Self {
        Self {
            session: None,
            redirect: LoginRedirect::Login(code),
        }
    }
}

/// Tracks the stage of one attempt so failures are logged with where they happened.
struct Attempt {
    stage: LoginStage,
}

impl Attempt {
    const fn new(stage: LoginStage) -> Self {
        Self { stage }
    }

    fn advance(&mut self, next: LoginStage) {
        tracing::debug!(from = ?self.stage, to = ?next, "Login stage");
        self.stage = next;
    }

    fn fail(&self, code: LoginErrorCode) -> LoginErrorCode {
        tracing::warn!(stage = ?self.stage, error = code.as_str(), "Login attempt failed");
        code
    }
}

pub struct LoginFlow<P, S> {
    provider: P,
    store: Arc<S>,
    codec: Arc<SessionCodec>,
    guard: Arc<StateGuard>,
    policy: CookiePolicy,
}

impl<P, S> LoginFlow<P, S>
where
    P: IdentityProvider,
    S: CredentialStore,
{
    #[must_use]
    pub const fn new(
        provider: P,
        store: Arc<S>,
        codec: Arc<SessionCodec>,
        guard: Arc<StateGuard>,
        policy: CookiePolicy,
    ) -> Self {
        Self {
            provider,
            store,
            codec,
            guard,
            policy,
        }
    }

    /// Starts a login: issues the state, remembers `return_url` if it is safe and points
    /// the browser at the provider.
    pub fn initiate(
        &self,
        jar: SignedCookieJar,
        return_url: Option<&str>,
    ) -> (SignedCookieJar, LoginRedirect) {
        let mut attempt = Attempt::new(LoginStage::Idle);
        let (jar, state) = match self.guard.begin(jar.clone()) {
            Ok(begun) => begun,
            Err(_) => return (jar, LoginRedirect::Login(attempt.fail(LoginErrorCode::InitFailed))),
        };
        let jar = return_url::remember(jar, self.policy, return_url);
        attempt.advance(LoginStage::RedirectingToProvider);
        let url = self.provider.authorize_url(&state);
        tracing::info!(return_url = return_url.is_some(), "Redirecting to Kakao");
        (jar, LoginRedirect::Provider(url))
    }

    /// Completes a login from the provider's redirect.
    ///
    /// The state check runs before any network call, so a forged or replayed callback
    /// never reaches the token endpoint.
    pub async fn handle_callback(
        &self,
        jar: SignedCookieJar,
        params: CallbackParams,
    ) -> (SignedCookieJar, CallbackOutcome) {
        let mut attempt = Attempt::new(LoginStage::AwaitingCallback);

        if let Some(ref error) = params.error {
            tracing::warn!(
                error = %error,
                description = params.error_description.as_deref().unwrap_or("none"),
                "Kakao reported an error"
            );
            let (jar, _) = self.guard.consume(jar, "");
            return (
                jar,
                CallbackOutcome::failed(attempt.fail(LoginErrorCode::KakaoError)),
            );
        }

        let (Some(code), Some(state)) = (
            params.code.filter(|c| !c.is_empty()),
            params.state.filter(|s| !s.is_empty()),
        ) else {
            return (
                jar,
                CallbackOutcome::failed(attempt.fail(LoginErrorCode::InvalidParams)),
            );
        };

        let (jar, state_ok) = self.guard.consume(jar, &state);
        if !state_ok {
            return (
                jar,
                CallbackOutcome::failed(attempt.fail(LoginErrorCode::InvalidState)),
            );
        }

        let (session, has_nickname) = match self.complete(&mut attempt, &code).await {
            Ok(completed) => completed,
            Err(code) => return (jar, CallbackOutcome::failed(attempt.fail(code))),
        };

        if !has_nickname {
            attempt.advance(LoginStage::RedirectNicknameSetup);
            return (
                jar,
                CallbackOutcome {
                    session: Some(session),
                    redirect: LoginRedirect::NicknameSetup,
                },
            );
        }

        attempt.advance(LoginStage::RedirectHome);
        let (jar, remembered) = return_url::consume(jar, self.policy);
        let redirect = remembered.map_or(LoginRedirect::Home, LoginRedirect::ReturnTo);
        (
            jar,
            CallbackOutcome {
                session: Some(session),
                redirect,
            },
        )
    }

    /// Exchange, profile, upsert and issue. Returns the session and whether the account
    /// already has a nickname.
    async fn complete(
        &self,
        attempt: &mut Attempt,
        code: &str,
    ) -> Result<(IssuedSession, bool), LoginErrorCode> {
        attempt.advance(LoginStage::ExchangingCode);
        let token = self.provider.exchange_code(code).await.map_err(|e| {
            tracing::error!(error = %e, "Code exchange failed");
            LoginErrorCode::TokenExchangeFailed
        })?;

        attempt.advance(LoginStage::FetchingProfile);
        let user = self
            .provider
            .fetch_profile(&token.access_token)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Profile lookup failed");
                LoginErrorCode::UserInfoFetchFailed
            })?;

        attempt.advance(LoginStage::UpsertingAccount);
        let account = match self.store.upsert_credential(&user.into_profile()).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                tracing::error!("Credential store returned no account");
                return Err(LoginErrorCode::SessionCreationFailed);
            }
            Err(e) => {
                tracing::error!(error = %e, "Credential upsert failed");
                return Err(LoginErrorCode::SessionCreationFailed);
            }
        };

        let nickname = account.nickname.as_deref().filter(|n| !n.is_empty());
        let session = self.codec.issue(&account.id, nickname).map_err(|e| {
            tracing::error!(error = %e, "Failed to issue session");
            LoginErrorCode::SessionCreationFailed
        })?;
        attempt.advance(LoginStage::SessionIssued);
        tracing::info!(user_id = %account.id, "Login succeeded");

        Ok((session, nickname.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::path::Path;

    use axum_extra::extract::cookie::Key;
    use chrono::Duration;
    use secrecy::SecretString;

    use super::*;
    use crate::{
        app::db::{self, Account, CredentialProfile, SqliteCredentialStore, StoreError, Withdrawal},
        config::Environment,
        http::auth::{
            cookies::{COOKIE_OAUTH_STATE, COOKIE_RETURN_URL},
            kakao::{KakaoToken, KakaoUser, ProviderError},
        },
    };

    #[derive(Default)]
    struct MockProvider {
        exchanges: AtomicUsize,
        profiles: AtomicUsize,
        fail_exchange: bool,
        fail_profile: bool,
        nickname: Option<&'static str>,
    }

    impl IdentityProvider for MockProvider {
        fn authorize_url(&self, state: &str) -> Url {
            let mut url = Url::parse("https://kauth.example/oauth/authorize").unwrap();
            url.query_pairs_mut().append_pair("state", state);
            url
        }

        async fn exchange_code(&self, _code: &str) -> Result<KakaoToken, ProviderError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if self.fail_exchange {
                return Err(ProviderError::Status {
                    operation: "token exchange",
                    status: 401,
                });
            }
            Ok(serde_json::from_str(
                r#"{"access_token":"at","token_type":"bearer","expires_in":60}"#,
            )
            .unwrap())
        }

        async fn fetch_profile(&self, _token: &SecretString) -> Result<KakaoUser, ProviderError> {
            self.profiles.fetch_add(1, Ordering::SeqCst);
            if self.fail_profile {
                return Err(ProviderError::Schema {
                    operation: "profile lookup",
                    reason: "test",
                });
            }
            Ok(serde_json::from_value(serde_json::json!({
                "id": 99,
                "kakao_account": {
                    "profile": {"nickname": self.nickname},
                    "email": "buyer@example.com"
                }
            }))
            .unwrap())
        }
    }

    struct EmptyStore;

    impl CredentialStore for EmptyStore {
        async fn upsert_credential(
            &self,
            _profile: &CredentialProfile,
        ) -> Result<Option<Account>, StoreError> {
            Ok(None)
        }
        async fn find_account(&self, _id: &str) -> Result<Option<Account>, StoreError> {
            Ok(None)
        }
        async fn nickname_taken(&self, _nickname: &str, _except: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn update_nickname(
            &self,
            _id: &str,
            _nickname: &str,
        ) -> Result<Option<Account>, StoreError> {
            Ok(None)
        }
        async fn withdraw(&self, _id: &str, _w: &Withdrawal) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    fn policy() -> CookiePolicy {
        CookiePolicy::for_environment(Environment::Test)
    }

    fn codec() -> Arc<SessionCodec> {
        Arc::new(
            SessionCodec::new(
                &SecretString::from("0123456789abcdef0123456789abcdef"),
                Duration::days(7),
            )
            .unwrap(),
        )
    }

    fn flow_with<S: CredentialStore>(provider: MockProvider, store: S) -> LoginFlow<MockProvider, S> {
        LoginFlow::new(
            provider,
            Arc::new(store),
            codec(),
            Arc::new(StateGuard::new(policy())),
            policy(),
        )
    }

    async fn sqlite_store() -> SqliteCredentialStore {
        SqliteCredentialStore::new(db::init(Path::new(":memory:")).await.unwrap())
    }

    fn jar() -> SignedCookieJar {
        SignedCookieJar::new(Key::generate())
    }

    fn state_of(redirect: &LoginRedirect) -> String {
        let LoginRedirect::Provider(ref url) = *redirect else {
            panic!("expected provider redirect, got {redirect:?}");
        };
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    fn params(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_owned),
            state: state.map(str::to_owned),
            ..CallbackParams::default()
        }
    }

    #[test]
    fn error_codes_round_trip() {
        for code in LoginErrorCode::ALL {
            assert_eq!(LoginErrorCode::from_code(code.as_str()), Some(code));
        }
        assert_eq!(LoginErrorCode::from_code("nope"), None);
        assert_eq!(
            LoginRedirect::Login(LoginErrorCode::InvalidState).target(),
            "/login?error=invalid_state"
        );
    }

    #[test]
    fn initiate_sets_state_and_safe_return_url() {
        let flow = flow_with(MockProvider::default(), EmptyStore);
        let (jar, redirect) = flow.initiate(jar(), Some("/ranking"));
        let state = state_of(&redirect);
        assert_eq!(jar.get(COOKIE_OAUTH_STATE).unwrap().value(), state);
        assert_eq!(jar.get(COOKIE_RETURN_URL).unwrap().value(), "/ranking");

        let (jar, _) = flow.initiate(self::jar(), Some("//evil.com"));
        assert!(jar.get(COOKIE_RETURN_URL).is_none());
    }

    #[tokio::test]
    async fn invalid_state_never_reaches_exchange() {
        let flow = flow_with(MockProvider::default(), sqlite_store().await);
        let (jar, _) = flow.initiate(jar(), None);

        let (_, outcome) = flow
            .handle_callback(jar, params(Some("valid-code"), Some("forged")))
            .await;
        assert_eq!(
            outcome.redirect,
            LoginRedirect::Login(LoginErrorCode::InvalidState)
        );
        assert!(outcome.session.is_none());
        assert_eq!(flow.provider.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_params_are_rejected_before_state() {
        let flow = flow_with(MockProvider::default(), EmptyStore);
        let (jar, redirect) = flow.initiate(jar(), None);
        let state = state_of(&redirect);

        let (jar, outcome) = flow.handle_callback(jar, params(None, Some(&state))).await;
        assert_eq!(
            outcome.redirect,
            LoginRedirect::Login(LoginErrorCode::InvalidParams)
        );
        // the state survives a malformed callback
        assert!(jar.get(COOKIE_OAUTH_STATE).is_some());

        let (_, outcome) = flow.handle_callback(jar, params(Some(""), Some(&state))).await;
        assert_eq!(
            outcome.redirect,
            LoginRedirect::Login(LoginErrorCode::InvalidParams)
        );
        assert_eq!(flow.provider.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_error_maps_to_kakao_error() {
        let flow = flow_with(MockProvider::default(), EmptyStore);
        let (jar, _) = flow.initiate(jar(), None);
        let (jar, outcome) = flow
            .handle_callback(
                jar,
                CallbackParams {
                    error: Some("access_denied".to_owned()),
                    error_description: Some("User denied access".to_owned()),
                    ..CallbackParams::default()
                },
            )
            .await;
        assert_eq!(
            outcome.redirect,
            LoginRedirect::Login(LoginErrorCode::KakaoError)
        );
        assert!(jar.get(COOKIE_OAUTH_STATE).is_none());
    }

    #[tokio::test]
    async fn upstream_failures_have_distinct_codes() {
        let flow = flow_with(
            MockProvider {
                fail_exchange: true,
                ..MockProvider::default()
            },
            EmptyStore,
        );
        let (jar, redirect) = flow.initiate(jar(), None);
        let (_, outcome) = flow
            .handle_callback(jar, params(Some("c"), Some(&state_of(&redirect))))
            .await;
        assert_eq!(
            outcome.redirect,
            LoginRedirect::Login(LoginErrorCode::TokenExchangeFailed)
        );
        assert_eq!(flow.provider.profiles.load(Ordering::SeqCst), 0);

        let flow = flow_with(
            MockProvider {
                fail_profile: true,
                ..MockProvider::default()
            },
            EmptyStore,
        );
        let (jar, redirect) = flow.initiate(self::jar(), None);
        let (_, outcome) = flow
            .handle_callback(jar, params(Some("c"), Some(&state_of(&redirect))))
            .await;
        assert_eq!(
            outcome.redirect,
            LoginRedirect::Login(LoginErrorCode::UserInfoFetchFailed)
        );
    }

    #[tokio::test]
    async fn empty_upsert_fails_session_creation() {
        let flow = flow_with(MockProvider::default(), EmptyStore);
        let (jar, redirect) = flow.initiate(jar(), None);
        let (_, outcome) = flow
            .handle_callback(jar, params(Some("c"), Some(&state_of(&redirect))))
            .await;
        assert_eq!(
            outcome.redirect,
            LoginRedirect::Login(LoginErrorCode::SessionCreationFailed)
        );
        assert!(outcome.session.is_none());
    }

    #[tokio::test]
    async fn first_login_goes_to_nickname_setup_and_keeps_return_url() {
        let flow = flow_with(MockProvider::default(), sqlite_store().await);
        let (jar, redirect) = flow.initiate(jar(), Some("/scrap"));
        let (jar, outcome) = flow
            .handle_callback(jar, params(Some("c"), Some(&state_of(&redirect))))
            .await;

        assert_eq!(outcome.redirect, LoginRedirect::NicknameSetup);
        let session = outcome.session.unwrap();
        let claims = flow.codec.verify(&session.token).unwrap();
        assert_eq!(claims.nickname, None);
        assert_eq!(jar.get(COOKIE_RETURN_URL).unwrap().value(), "/scrap");
        assert_eq!(flow.provider.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn returning_user_goes_to_remembered_url_once() {
        let store = sqlite_store().await;
        let account = store
            .upsert_credential(&CredentialProfile {
                kakao_id: "99".to_owned(),
                email: None,
                name: None,
                profile_url: None,
            })
            .await
            .unwrap()
            .unwrap();
        store.update_nickname(&account.id, "단골").await.unwrap();

        let flow = flow_with(MockProvider::default(), store);
        let (jar, redirect) = flow.initiate(jar(), Some("/ranking"));
        let state = state_of(&redirect);
        let replayed = jar.clone();
        let (jar, outcome) = flow
            .handle_callback(jar, params(Some("c"), Some(&state)))
            .await;
        assert_eq!(
            outcome.redirect,
            LoginRedirect::ReturnTo("/ranking".to_owned())
        );
        let claims = flow.codec.verify(&outcome.session.unwrap().token).unwrap();
        assert_eq!(claims.user_id, account.id);
        assert_eq!(claims.nickname.as_deref(), Some("단골"));
        assert!(jar.get(COOKIE_RETURN_URL).is_none());

        // replaying the same callback fails at the state check
        let (_, replay) = flow
            .handle_callback(replayed, params(Some("c"), Some(&state)))
            .await;
        assert_eq!(
            replay.redirect,
            LoginRedirect::Login(LoginErrorCode::InvalidState)
        );
        assert_eq!(flow.provider.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn returning_user_without_return_url_goes_home() {
        let store = sqlite_store().await;
        let account = store
            .upsert_credential(&CredentialProfile {
                kakao_id: "99".to_owned(),
                email: None,
                name: None,
                profile_url: None,
            })
            .await
            .unwrap()
            .unwrap();
        store.update_nickname(&account.id, "단골").await.unwrap();

        let flow = flow_with(MockProvider::default(), store);
        let (jar, redirect) = flow.initiate(jar(), None);
        let (_, outcome) = flow
            .handle_callback(jar, params(Some("c"), Some(&state_of(&redirect))))
            .await;
        assert_eq!(outcome.redirect, LoginRedirect::Home);
    }
}
