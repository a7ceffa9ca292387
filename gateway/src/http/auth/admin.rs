//! Role check for administrator-only handlers.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use thiserror::Error;

use crate::{
    app::{
        AppState,
        db::{Account, CredentialStore as _, Role, StoreError},
    },
    http::auth::session_claims,
};

/// An account with [`Role::Admin`], loaded fresh for the request.
///
/// The role is read from the store, not the session token, so a demotion takes effect
/// on the next request.
#[derive(Debug, Clone)]
pub struct AdminAccount(pub Account);

#[derive(Debug, Error)]
pub enum AdminRejection {
    #[error("로그인이 필요합니다.")]
    Unauthenticated,
    #[error("관리자 권한이 필요합니다.")]
    Forbidden,
    #[error("account lookup failed")]
    Store(#[from] StoreError),
}

impl IntoResponse for AdminRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()).into_response(),
            Self::Forbidden => (StatusCode::FORBIDDEN, self.to_string()).into_response(),
            Self::Store(ref e) => {
                tracing::error!(error = %e, "admin: account lookup failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl FromRequestParts<AppState> for AdminAccount {
    type Rejection = AdminRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let claims =
            session_claims(&jar, &state.codec).ok_or(AdminRejection::Unauthenticated)?;
        let account = state
            .store
            .find_account(&claims.user_id)
            .await?
            .ok_or(AdminRejection::Unauthenticated)?;

        if account.role != Role::Admin {
            tracing::warn!(user_id = %account.id, "admin: access denied");
            return Err(AdminRejection::Forbidden);
        }
        Ok(Self(account))
    }
}
