//! Session and OAuth login core.
//!
//! - [`token`]: signed session tokens.
//! - [`state_guard`]: single-use OAuth `state`.
//! - [`return_url`]: post-login destination.
//! - [`flow`]: the Kakao login state machine.
//! - [`gatekeeper`] and [`middleware`]: per-request access decisions.
//! - [`admin`]: the administrator role check.

pub mod admin;
pub mod cookies;
pub mod flow;
pub mod gatekeeper;
pub mod kakao;
pub mod middleware;
pub mod return_url;
pub mod state_guard;
pub mod token;

use axum::response::Redirect;

pub use admin::AdminAccount;
pub use flow::LoginErrorCode;
pub use middleware::{GateState, require, session_claims};

/// Redirect to the login page showing `code`.
pub(crate) fn login_error_redirect(code: LoginErrorCode) -> Redirect {
    Redirect::to(&format!("{}?error={}", gatekeeper::LOGIN_PATH, code.as_str()))
}
