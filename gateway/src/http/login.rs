//! Login route handlers: Kakao round trip, login page and logout.

use axum::{
    Router,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect},
    routing::{get, post},
};
use axum_extra::extract::cookie::{CookieJar, SignedCookieJar};
use serde::Deserialize;
use url::{Url, form_urlencoded};

use crate::{
    app::AppState,
    http::{
        auth::{
            LoginErrorCode,
            cookies::{COOKIE_OAUTH_STATE, COOKIE_RETURN_URL, COOKIE_SESSION},
            flow::{CallbackParams, UNKNOWN_ERROR_MESSAGE},
            gatekeeper::LOGIN_PATH,
        },
        pages::{error_banner, render},
    },
};

const LOGIN: &str = include_str!("../../assets/login.html");

/// Routes reachable without a session.
pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/kakao", get(initiate))
        .route("/api/auth/callback/kakao", get(callback))
        .route("/logout", post(logout))
}

/// The login page itself, which the gatekeeper bounces authenticated users away from.
pub(crate) fn page_routes() -> Router<AppState> {
    Router::new().route(LOGIN_PATH, get(page))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct InitiateQuery {
    #[serde(rename = "returnUrl")]
    return_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LoginPageQuery {
    error: Option<String>,
    #[serde(rename = "returnUrl")]
    return_url: Option<String>,
}

/// Starts the Kakao login.
#[axum::debug_handler]
pub(crate) async fn initiate(
    State(AppState { login, .. }): State<AppState>,
    jar: SignedCookieJar,
    query: Result<Query<InitiateQuery>, QueryRejection>,
) -> impl IntoResponse {
    let return_url = match query {
        Ok(Query(InitiateQuery { return_url })) => return_url,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "login: malformed query, ignoring return url");
            None
        }
    };
    let (jar, redirect) = login.initiate(jar, return_url.as_deref());
    (jar, Redirect::to(&redirect.target()))
}

/// Kakao redirects back here with `code` and `state`.
#[axum::debug_handler]
pub(crate) async fn callback(
    State(AppState { login, cookies, .. }): State<AppState>,
    signed: SignedCookieJar,
    jar: CookieJar,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> impl IntoResponse {
    // Unparseable parameters go through the flow as missing ones.
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "callback: malformed query");
            CallbackParams::default()
        }
    };
    let (signed, outcome) = login.handle_callback(signed, params).await;
    let jar = match outcome.session {
        Some(session) => jar.add(cookies.session_cookie(session.token, session.expires_at)),
        None => jar,
    };
    (signed, jar, Redirect::to(&outcome.redirect.target()))
}

/// Handle GET requests to the login page.
#[axum::debug_handler]
pub(crate) async fn page(query: Result<Query<LoginPageQuery>, QueryRejection>) -> Html<String> {
    let LoginPageQuery { error, return_url } = query.map(|Query(q)| q).unwrap_or_default();
    let message = error.as_deref().map(|code| {
        LoginErrorCode::from_code(code).map_or(UNKNOWN_ERROR_MESSAGE, LoginErrorCode::message)
    });

    let mut href = String::from("/auth/kakao");
    if let Some(return_url) = return_url.as_deref().filter(|u| !u.is_empty()) {
        href.push_str("?returnUrl=");
        href.extend(form_urlencoded::byte_serialize(return_url.as_bytes()));
    }

    let content = LOGIN
        .replace("{ maybe_error }", &error_banner(message))
        .replace("{ login_href }", &href);
    render("로그인", &content)
}

/// Handle logout requests.
#[axum::debug_handler]
pub(crate) async fn logout(
    State(AppState { cookies, .. }): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> impl IntoResponse {
    // Reject cross-site logout triggers: Origin or Referer, when sent, must name this host.
    if let Some(source) = headers.get("origin").or_else(|| headers.get("referer"))
        && let Some(host) = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get("host"))
            .and_then(|h| h.to_str().ok())
        && !same_host(source.to_str().unwrap_or_default(), host)
    {
        tracing::warn!(origin = ?source, host = %host, "logout: origin/referrer mismatch");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let jar = [COOKIE_SESSION, COOKIE_OAUTH_STATE, COOKIE_RETURN_URL]
        .into_iter()
        .fold(jar, |jar, name| jar.remove(cookies.removal(name)));
    tracing::info!("logout: session cleared");
    (jar, Redirect::to(LOGIN_PATH)).into_response()
}

/// `source` is an absolute URL whose host and port are exactly those of `host`, a
/// `Host` header value.
fn same_host(source: &str, host: &str) -> bool {
    let Ok(source) = Url::parse(source) else {
        return false;
    };
    let Ok(expected) = Url::parse(&format!("{}://{host}", source.scheme())) else {
        return false;
    };
    source.host_str().is_some()
        && source.host_str() == expected.host_str()
        && source.port_or_known_default() == expected.port_or_known_default()
        && expected.path() == "/"
}
