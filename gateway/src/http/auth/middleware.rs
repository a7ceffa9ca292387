//! Cookie I/O around the gatekeeper decision.

use alloc::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRef, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;

use crate::{
    app::AppState,
    http::auth::{
        cookies::{COOKIE_SESSION, CookiePolicy},
        gatekeeper::{GateDecision, decide},
        token::{SessionClaims, SessionCodec},
    },
};

/// State the gate layer needs from [`AppState`].
#[derive(Clone)]
pub struct GateState {
    pub codec: Arc<SessionCodec>,
    pub policy: CookiePolicy,
}

impl FromRef<AppState> for GateState {
    fn from_ref(input: &AppState) -> Self {
        Self {
            codec: input.codec.clone(),
            policy: input.cookies,
        }
    }
}

/// Verified claims of the request's session cookie, if any.
#[must_use]
pub fn session_claims(jar: &CookieJar, codec: &SessionCodec) -> Option<SessionClaims> {
    jar.get(COOKIE_SESSION).and_then(|c| codec.verify(c.value()))
}

/// Enforces the login wall and the nickname setup on page routes.
///
/// Allowed requests carry their [`SessionClaims`] as a request extension.
pub async fn require(
    State(GateState { codec, policy }): State<GateState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let cookie_present = jar.get(COOKIE_SESSION).is_some();
    let claims = session_claims(&jar, &codec);
    let path = req.uri().path().to_owned();

    match decide(cookie_present, claims.as_ref(), &path) {
        GateDecision::Allow => {
            if let Some(claims) = claims {
                req.extensions_mut().insert(claims);
            }
            next.run(req).await
        }
        GateDecision::Redirect {
            target,
            clear_session,
        } => {
            tracing::debug!(path = %path, target = %target, clear_session, "require: redirecting");
            if clear_session {
                tracing::info!("require: clearing session cookie that failed verification");
                let jar = jar.remove(policy.removal(COOKIE_SESSION));
                (jar, Redirect::temporary(&target)).into_response()
            } else {
                Redirect::temporary(&target).into_response()
            }
        }
    }
}
