//! Single-use OAuth `state` values.
//!
//! The value itself travels in the signed `oauth_state` cookie. Because two requests can
//! present the same cookie at once, consumed values are also recorded in a process-wide
//! ledger so that at most one of them is ever accepted.

use core::time::Duration;
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Instant,
};

use axum_extra::extract::cookie::SignedCookieJar;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore as _, rngs::OsRng};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::http::auth::cookies::{COOKIE_OAUTH_STATE, CookiePolicy};

/// How long a consumed state stays in the ledger. Matches the cookie lifetime, after
/// which the cookie can no longer be presented anyway.
const LEDGER_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum StateError {
    #[error("system randomness unavailable")]
    Entropy,
}

#[derive(Debug)]
pub struct StateGuard {
    policy: CookiePolicy,
    consumed: Mutex<HashMap<[u8; 32], Instant>>,
}

impl StateGuard {
    #[must_use]
    pub fn new(policy: CookiePolicy) -> Self {
        Self {
            policy,
            consumed: Mutex::new(HashMap::new()),
        }
    }

    /// Generates a fresh state and stores it in the `oauth_state` cookie.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Entropy`] if the operating system RNG fails.
    pub fn begin(&self, jar: SignedCookieJar) -> Result<(SignedCookieJar, String), StateError> {
        let mut bytes = [0_u8; 32];
        OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
            tracing::error!(error = %e, "Failed to generate OAuth state");
            StateError::Entropy
        })?;
        let state = URL_SAFE_NO_PAD.encode(bytes);
        let jar = jar.add(
            self.policy
                .ephemeral_cookie(COOKIE_OAUTH_STATE, state.clone()),
        );
        Ok((jar, state))
    }

    /// Reads and clears the stored state, returning whether `presented` matches it.
    ///
    /// The cookie is removed whatever the outcome. A missing cookie never matches.
    pub fn consume(&self, jar: SignedCookieJar, presented: &str) -> (SignedCookieJar, bool) {
        let stored = jar
            .get(COOKIE_OAUTH_STATE)
            .map(|c| c.value().to_owned());
        let jar = jar.remove(self.policy.removal(COOKIE_OAUTH_STATE));

        let Some(stored) = stored else {
            tracing::warn!("OAuth callback without state cookie");
            return (jar, false);
        };
        if presented.is_empty() || stored != presented {
            tracing::warn!("OAuth state mismatch");
            return (jar, false);
        }
        if !self.mark_consumed(&stored) {
            tracing::warn!("OAuth state replayed");
            return (jar, false);
        }
        (jar, true)
    }

    /// Records `state` as used. Returns `false` if it already was.
    fn mark_consumed(&self, state: &str) -> bool {
        let digest: [u8; 32] = Sha256::digest(state.as_bytes()).into();
        let now = Instant::now();
        let mut consumed = self
            .consumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        consumed.retain(|_, at| now.duration_since(*at) < LEDGER_TTL);
        consumed.insert(digest, now).is_none()
    }
}
