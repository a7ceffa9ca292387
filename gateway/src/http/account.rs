//! Account settings: nickname setup, withdrawal and the current account lookup.

use axum::{
    Extension, Form, Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::{
    app::{
        AppState,
        db::{Account, CredentialStore as _, StoreError, Withdrawal},
    },
    http::{
        auth::{
            AdminAccount, LoginErrorCode,
            cookies::{COOKIE_SESSION, CookiePolicy},
            gatekeeper::{HOME_PATH, LOGIN_PATH, NICKNAME_SETUP_PATH},
            login_error_redirect, session_claims,
            token::SessionClaims,
        },
        pages::{error_banner, render},
    },
};

const NICKNAME: &str = include_str!("../../assets/nickname.html");
const WITHDRAW: &str = include_str!("../../assets/withdraw.html");

pub(crate) const WITHDRAW_PATH: &str = "/settings/withdraw";

const NICKNAME_MIN_CHARS: usize = 2;
const NICKNAME_MAX_CHARS: usize = 10;
const WITHDRAW_COMMENT_MAX_CHARS: usize = 500;

/// Matched case-insensitively anywhere in a nickname.
const FORBIDDEN_NICKNAME_WORDS: [&str; 9] = [
    "관리자",
    "admin",
    "administrator",
    "root",
    "system",
    "운영자",
    "금지어",
    "테스트",
    "test",
];

/// Settings pages, all behind the gatekeeper.
pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            NICKNAME_SETUP_PATH,
            get(nickname_page).post(nickname_submit),
        )
        .route(WITHDRAW_PATH, get(withdraw_page).post(withdraw_submit))
}

/// JSON endpoints that answer with a status instead of a redirect.
pub(crate) fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/me", get(me))
        .route("/api/admin/me", get(admin_me))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicknameError {
    Invalid,
    Duplicate,
    UpdateFailed,
}

impl NicknameError {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid_nickname",
            Self::Duplicate => "duplicate_nickname",
            Self::UpdateFailed => "update_failed",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        [Self::Invalid, Self::Duplicate, Self::UpdateFailed]
            .into_iter()
            .find(|e| e.as_str() == code)
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Invalid => "올바르지 않은 닉네임입니다.",
            Self::Duplicate => "중복된 닉네임이에요",
            Self::UpdateFailed => "닉네임 업데이트에 실패했습니다.",
        }
    }

    fn redirect(self) -> Redirect {
        Redirect::to(&format!("{NICKNAME_SETUP_PATH}?error={}", self.as_str()))
    }
}

/// Length and forbidden word rules for nicknames. Length counts characters.
#[must_use]
pub fn is_valid_nickname(nickname: &str) -> bool {
    let chars = nickname.chars().count();
    if !(NICKNAME_MIN_CHARS..=NICKNAME_MAX_CHARS).contains(&chars) {
        return false;
    }
    let lowered = nickname.to_lowercase();
    !FORBIDDEN_NICKNAME_WORDS
        .iter()
        .any(|word| lowered.contains(word))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawError {
    Invalid,
    Failed,
}

impl WithdrawError {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid_withdrawal",
            Self::Failed => "withdraw_failed",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        [Self::Invalid, Self::Failed]
            .into_iter()
            .find(|e| e.as_str() == code)
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Invalid => "탈퇴 사유를 확인해주세요.",
            Self::Failed => "회원 탈퇴에 실패했습니다. 잠시 후 다시 시도해주세요.",
        }
    }

    fn redirect(self) -> Redirect {
        Redirect::to(&format!("{WITHDRAW_PATH}?error={}", self.as_str()))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WithdrawForm {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    comment: Option<String>,
}

impl WithdrawForm {
    /// A reason is required, the comment is optional and bounded.
    fn validate(self) -> Result<Withdrawal, WithdrawError> {
        if self.kind.is_empty() {
            return Err(WithdrawError::Invalid);
        }
        let comment = self.comment.filter(|c| !c.is_empty());
        if comment
            .as_deref()
            .is_some_and(|c| c.chars().count() > WITHDRAW_COMMENT_MAX_CHARS)
        {
            return Err(WithdrawError::Invalid);
        }
        Ok(Withdrawal {
            kind: self.kind,
            comment,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct NicknameForm {
    #[serde(default)]
    nickname: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorQuery {
    error: Option<String>,
}

/// Session gone or its account deleted: clear the cookie and ask for a new login.
fn session_expired(jar: CookieJar, policy: CookiePolicy) -> Response {
    (
        jar.remove(policy.removal(COOKIE_SESSION)),
        login_error_redirect(LoginErrorCode::SessionExpired),
    )
        .into_response()
}

#[axum::debug_handler]
async fn nickname_page(query: Result<Query<ErrorQuery>, QueryRejection>) -> Html<String> {
    let ErrorQuery { error } = query.map(|Query(q)| q).unwrap_or_default();
    let message = error
        .as_deref()
        .and_then(NicknameError::from_code)
        .map(NicknameError::message);
    render(
        "닉네임 설정",
        &NICKNAME.replace("{ maybe_error }", &error_banner(message)),
    )
}

#[axum::debug_handler]
async fn nickname_submit(
    State(AppState {
        store,
        codec,
        cookies,
        ..
    }): State<AppState>,
    claims: Option<Extension<SessionClaims>>,
    jar: CookieJar,
    Form(NicknameForm { nickname }): Form<NicknameForm>,
) -> Response {
    if !is_valid_nickname(&nickname) {
        tracing::info!("nickname: rejected by validation");
        return NicknameError::Invalid.redirect().into_response();
    }
    let Some(Extension(claims)) = claims else {
        return session_expired(jar, cookies);
    };

    match store.nickname_taken(&nickname, &claims.user_id).await {
        Ok(false) => {}
        Ok(true) => return NicknameError::Duplicate.redirect().into_response(),
        Err(e) => {
            tracing::error!(error = %e, "nickname: duplicate check failed");
            return NicknameError::UpdateFailed.redirect().into_response();
        }
    }

    let account = match store.update_nickname(&claims.user_id, &nickname).await {
        Ok(Some(account)) => account,
        Ok(None) => {
            tracing::warn!(user_id = %claims.user_id, "nickname: account no longer exists");
            return session_expired(jar, cookies);
        }
        Err(StoreError::Conflict) => return NicknameError::Duplicate.redirect().into_response(),
        Err(e) => {
            tracing::error!(error = %e, "nickname: update failed");
            return NicknameError::UpdateFailed.redirect().into_response();
        }
    };

    let session = match codec.issue(&account.id, account.nickname.as_deref()) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "nickname: failed to re-issue session");
            return NicknameError::UpdateFailed.redirect().into_response();
        }
    };
    tracing::info!(user_id = %account.id, "nickname: updated");
    (
        jar.add(cookies.session_cookie(session.token, session.expires_at)),
        Redirect::to(HOME_PATH),
    )
        .into_response()
}

#[axum::debug_handler]
async fn withdraw_page(query: Result<Query<ErrorQuery>, QueryRejection>) -> Html<String> {
    let ErrorQuery { error } = query.map(|Query(q)| q).unwrap_or_default();
    let message = error
        .as_deref()
        .and_then(WithdrawError::from_code)
        .map(WithdrawError::message);
    render(
        "회원 탈퇴",
        &WITHDRAW.replace("{ maybe_error }", &error_banner(message)),
    )
}

#[axum::debug_handler]
async fn withdraw_submit(
    State(AppState { store, cookies, .. }): State<AppState>,
    claims: Option<Extension<SessionClaims>>,
    jar: CookieJar,
    Form(form): Form<WithdrawForm>,
) -> Response {
    let Some(Extension(claims)) = claims else {
        return Redirect::to(LOGIN_PATH).into_response();
    };
    let withdrawal = match form.validate() {
        Ok(withdrawal) => withdrawal,
        Err(e) => return e.redirect().into_response(),
    };

    match store.withdraw(&claims.user_id, &withdrawal).await {
        Ok(true) => tracing::info!(user_id = %claims.user_id, reason = %withdrawal.kind, "withdraw: account deleted"),
        Ok(false) => tracing::warn!(user_id = %claims.user_id, "withdraw: account was already gone"),
        Err(e) => {
            tracing::error!(error = %e, "withdraw: transaction failed");
            return WithdrawError::Failed.redirect().into_response();
        }
    }
    (
        jar.remove(cookies.removal(COOKIE_SESSION)),
        Redirect::to(LOGIN_PATH),
    )
        .into_response()
}

/// The account behind the request's session.
#[axum::debug_handler]
async fn me(
    State(AppState { store, codec, .. }): State<AppState>,
    jar: CookieJar,
) -> Response {
    let Some(claims) = session_claims(&jar, &codec) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match store.find_account(&claims.user_id).await {
        Ok(Some(account)) => Json(account).into_response(),
        Ok(None) => StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "me: account lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// The administrator behind the request's session.
#[axum::debug_handler(state = AppState)]
async fn admin_me(AdminAccount(account): AdminAccount) -> Json<Account> {
    Json(account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nickname_rules() {
        assert!(is_valid_nickname("기념품"));
        assert!(is_valid_nickname("ab"));
        assert!(is_valid_nickname("열글자닉네임입니다다"));
        assert!(!is_valid_nickname("a"));
        assert!(!is_valid_nickname("열한글자닉네임입니다다"));
        assert!(!is_valid_nickname("superAdmin"));
        assert!(!is_valid_nickname("ROOTbeer"));
        assert!(!is_valid_nickname("나는관리자"));
        assert!(!is_valid_nickname("테스트계정"));
    }

    #[test]
    fn withdrawal_form_rules() {
        let form = |kind: &str, comment: Option<String>| WithdrawForm {
            kind: kind.to_owned(),
            comment,
        };
        assert_eq!(
            form("rarely_use", Some(String::new())).validate(),
            Ok(Withdrawal {
                kind: "rarely_use".to_owned(),
                comment: None,
            })
        );
        assert_eq!(form("", None).validate(), Err(WithdrawError::Invalid));
        assert!(form("other", Some("가".repeat(500))).validate().is_ok());
        assert_eq!(
            form("other", Some("가".repeat(501))).validate(),
            Err(WithdrawError::Invalid)
        );
    }

    #[test]
    fn error_codes_resolve_to_messages() {
        assert_eq!(
            NicknameError::from_code("duplicate_nickname").map(NicknameError::message),
            Some("중복된 닉네임이에요")
        );
        assert_eq!(NicknameError::from_code("nope"), None);
        assert_eq!(
            WithdrawError::from_code("withdraw_failed"),
            Some(WithdrawError::Failed)
        );
    }
}
