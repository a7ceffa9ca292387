//! Signed session token: an HS256 JWT carrying the account id and nickname.
//!
//! The token is the only authentication state. Nothing about a session is stored
//! server side; whoever holds a token that verifies is logged in until it expires.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfigError, MAX_LIFETIME_DAYS, MIN_SECRET_LEN};

/// Claims carried by the `session` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: String,
    #[serde(default)]
    pub nickname: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    #[must_use]
    pub fn has_nickname(&self) -> bool {
        self.nickname.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// A freshly signed token together with its expiry.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("session user id must not be empty")]
    EmptyUserId,
    #[error("session expiry is out of range")]
    ExpiryOutOfRange,
    #[error("failed to sign session token")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Issues and verifies session tokens with a server-held secret.
pub struct SessionCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl core::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionCodec")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl SessionCodec {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the secret is empty or shorter than
    /// [`MIN_SECRET_LEN`] characters, or the lifetime is not positive.
    pub fn new(secret: &SecretString, lifetime: Duration) -> Result<Self, ConfigError> {
        let secret = secret.expose_secret();
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if secret.chars().count() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret {
                min: MIN_SECRET_LEN,
            });
        }
        if lifetime <= Duration::zero() {
            return Err(ConfigError::LifetimeOutOfRange {
                max: MAX_LIFETIME_DAYS,
            });
        }

        // Expiry is checked by hand in `verify_at` so tests can pin the clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_owned()]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            lifetime,
        })
    }

    /// Issues a token for `user_id` valid for the configured lifetime.
    ///
    /// # Errors
    ///
    /// Returns an error if `user_id` is empty or signing fails.
    pub fn issue(&self, user_id: &str, nickname: Option<&str>) -> Result<IssuedSession, TokenError> {
        self.issue_at(Utc::now(), user_id, nickname)
    }

    /// Like [`Self::issue`] with an explicit issue time.
    ///
    /// # Errors
    ///
    /// Returns an error if `user_id` is empty, the expiry overflows or signing fails.
    pub fn issue_at(
        &self,
        now: DateTime<Utc>,
        user_id: &str,
        nickname: Option<&str>,
    ) -> Result<IssuedSession, TokenError> {
        if user_id.is_empty() {
            return Err(TokenError::EmptyUserId);
        }
        let expires_at = now
            .checked_add_signed(self.lifetime)
            .ok_or(TokenError::ExpiryOutOfRange)?;
        let claims = SessionClaims {
            user_id: user_id.to_owned(),
            nickname: nickname.map(str::to_owned),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(IssuedSession { token, expires_at })
    }

    /// Returns the claims if the token is authentic, unexpired and well formed.
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<SessionClaims> {
        self.verify_at(token, Utc::now())
    }

    /// Like [`Self::verify`] against an explicit clock.
    #[must_use]
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Option<SessionClaims> {
        let claims = match decode::<SessionClaims>(token, &self.decoding, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected session token");
                return None;
            }
        };
        if now.timestamp() >= claims.exp {
            tracing::debug!(exp = claims.exp, "Session token expired");
            return None;
        }
        if claims.user_id.is_empty() {
            tracing::debug!("Session token without user id");
            return None;
        }
        Some(claims)
    }
}
