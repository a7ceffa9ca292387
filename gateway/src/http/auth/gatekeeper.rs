//! Per-request access decision.
//!
//! [`decide`] has no I/O. The cookie handling around it lives in
//! [`crate::http::auth::middleware::require`].

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::http::auth::token::SessionClaims;

pub const HOME_PATH: &str = "/";
pub const LOGIN_PATH: &str = "/login";
pub const NICKNAME_SETUP_PATH: &str = "/settings/nickname";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Redirect {
        target: String,
        /// The request carried a session cookie that failed verification.
        clear_session: bool,
    },
}

impl GateDecision {
    fn redirect(target: impl Into<String>) -> Self {
        Self::Redirect {
            target: target.into(),
            clear_session: false,
        }
    }
}

/// `path` is `prefix` itself or a sub path of it.
#[must_use]
pub fn is_under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Decides what happens to a request for `path`.
///
/// `cookie_present` tells whether a session cookie was sent at all, `verified` holds its
/// claims if it verified.
#[must_use]
pub fn decide(cookie_present: bool, verified: Option<&SessionClaims>, path: &str) -> GateDecision {
    if is_under(path, LOGIN_PATH) {
        return match verified {
            Some(_) => GateDecision::redirect(HOME_PATH),
            None => GateDecision::Allow,
        };
    }

    let Some(claims) = verified else {
        return GateDecision::Redirect {
            target: login_redirect_target(path),
            clear_session: cookie_present,
        };
    };

    if !claims.has_nickname() && !is_under(path, NICKNAME_SETUP_PATH) {
        return GateDecision::redirect(NICKNAME_SETUP_PATH);
    }

    GateDecision::Allow
}

/// Escaped in the `returnUrl` value. `/` stays readable.
const RETURN_URL_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'`');

/// `/login?returnUrl=<path>`.
fn login_redirect_target(path: &str) -> String {
    format!(
        "{LOGIN_PATH}?returnUrl={}",
        utf8_percent_encode(path, RETURN_URL_VALUE)
    )
}
