//! Cookie names and builders for the session and the OAuth round trip.

use axum_extra::extract::cookie::{Cookie, Key};
use chrono::{DateTime, Utc};
use cookie::{CookieBuilder, SameSite, time::Duration as CookieDuration, time::OffsetDateTime};
use secrecy::{ExposeSecret as _, SecretString};

use crate::config::{ConfigError, Environment, MIN_SECRET_LEN};

/// Cookie name constants for authentication
pub const COOKIE_SESSION: &str = "session";
pub const COOKIE_OAUTH_STATE: &str = "oauth_state";
pub const COOKIE_RETURN_URL: &str = "return_url";

/// Lifetime of the cookies that only live across one provider round trip.
pub const EPHEMERAL_TTL: CookieDuration = CookieDuration::minutes(10);

/// Derives the key for the signed cookie jar from the session secret.
///
/// # Errors
///
/// Returns [`ConfigError::WeakSecret`] if the secret is shorter than 32 bytes.
pub fn key_from_session_secret(secret: &SecretString) -> Result<Key, ConfigError> {
    let bytes = secret.expose_secret().as_bytes();
    if bytes.len() < MIN_SECRET_LEN {
        return Err(ConfigError::WeakSecret {
            min: MIN_SECRET_LEN,
        });
    }
    Ok(Key::derive_from(bytes))
}

/// Flags shared by every cookie the gateway sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookiePolicy {
    secure: bool,
    same_site: SameSite,
}

impl CookiePolicy {
    /// Production cookies are `Secure` with `SameSite=None`, everything else uses `Lax`.
    #[must_use]
    pub const fn for_environment(environment: Environment) -> Self {
        if environment.is_production() {
            Self {
                secure: true,
                same_site: SameSite::None,
            }
        } else {
            Self {
                secure: false,
                same_site: SameSite::Lax,
            }
        }
    }

    fn builder(self, name: &'static str, value: String) -> CookieBuilder<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .path("/")
    }

    /// Session cookie expiring together with the token it carries.
    #[must_use]
    pub fn session_cookie(self, token: String, expires_at: DateTime<Utc>) -> Cookie<'static> {
        let builder = self.builder(COOKIE_SESSION, token);
        match OffsetDateTime::from_unix_timestamp(expires_at.timestamp()) {
            Ok(at) => builder.expires(at).build(),
            Err(_) => builder
                .max_age(CookieDuration::seconds(
                    (expires_at - Utc::now()).num_seconds().max(0),
                ))
                .build(),
        }
    }

    /// Short-lived cookie for the OAuth state and the return url.
    #[must_use]
    pub fn ephemeral_cookie(self, name: &'static str, value: String) -> Cookie<'static> {
        self.builder(name, value).max_age(EPHEMERAL_TTL).build()
    }

    /// Cookie matching `name` with the same path, for use with `jar.remove`.
    #[must_use]
    pub fn removal(self, name: &'static str) -> Cookie<'static> {
        self.builder(name, String::new()).build()
    }
}
