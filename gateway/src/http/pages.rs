//! Server-rendered storefront pages behind the gatekeeper.
//!
//! The pages only stand in for the storefront views; what matters here is that each of
//! them is reachable exactly when the gatekeeper allows it.

use axum::{Extension, Router, response::Html, routing::get};

use crate::{app::AppState, http::auth::token::SessionClaims};

const LAYOUT: &str = include_str!("../../assets/layout.html");
const PAGE: &str = include_str!("../../assets/page.html");

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/scrap", get(scrap))
        .route("/ranking", get(ranking))
        .route("/settings", get(settings))
}

/// Wraps `content` in the shared layout.
pub(crate) fn render(title: &str, content: &str) -> Html<String> {
    Html(
        LAYOUT
            .replace("{ title }", title)
            .replace("{ content }", content),
    )
}

/// Error banner for a page, or nothing.
pub(crate) fn error_banner(message: Option<&str>) -> String {
    message.map_or_else(String::new, |m| {
        format!(r#"<p class="error" role="alert">{}</p>"#, escape_html(m))
    })
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn page(title: &str, claims: &SessionClaims) -> Html<String> {
    let nickname = claims.nickname.as_deref().unwrap_or_default();
    let heading = format!("{title} · {}", escape_html(nickname));
    render(title, &PAGE.replace("{ heading }", &heading))
}

async fn home(Extension(claims): Extension<SessionClaims>) -> Html<String> {
    page("홈", &claims)
}

async fn scrap(Extension(claims): Extension<SessionClaims>) -> Html<String> {
    page("스크랩", &claims)
}

async fn ranking(Extension(claims): Extension<SessionClaims>) -> Html<String> {
    page("랭킹", &claims)
}

async fn settings(Extension(claims): Extension<SessionClaims>) -> Html<String> {
    page("설정", &claims)
}

/// Liveness probe, not gated.
pub(crate) async fn healthz() -> &'static str {
    "ok"
}
