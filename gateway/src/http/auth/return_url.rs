//! Post-login destination remembered across the provider round trip.

use axum_extra::extract::cookie::SignedCookieJar;

use crate::http::auth::cookies::{COOKIE_RETURN_URL, CookiePolicy};

/// Whether `url` is a path on this site that is safe to redirect to.
///
/// Only root-relative paths qualify. `//host` and `/\host` are rejected since browsers
/// resolve both against another origin.
#[must_use]
pub fn is_safe_internal_path(url: &str) -> bool {
    let Some(rest) = url.strip_prefix('/') else {
        return false;
    };
    !rest.starts_with(['/', '\\']) && !url.chars().any(char::is_control)
}

/// Stores `url` for after the login, if it is safe. Anything else is silently dropped.
pub fn remember(jar: SignedCookieJar, policy: CookiePolicy, url: Option<&str>) -> SignedCookieJar {
    match url {
        Some(url) if is_safe_internal_path(url) => {
            jar.add(policy.ephemeral_cookie(COOKIE_RETURN_URL, url.to_owned()))
        }
        Some(url) => {
            tracing::debug!(return_url = %url.escape_debug(), "Ignoring unsafe return url");
            jar
        }
        None => jar,
    }
}

/// Takes the remembered url out of the jar. Single use.
pub fn consume(jar: SignedCookieJar, policy: CookiePolicy) -> (SignedCookieJar, Option<String>) {
    let url = jar
        .get(COOKIE_RETURN_URL)
        .map(|c| c.value().to_owned())
        .filter(|url| is_safe_internal_path(url));
    (jar.remove(policy.removal(COOKIE_RETURN_URL)), url)
}

#[cfg(test)]
mod tests {
    use axum_extra::extract::cookie::Key;

    use super::*;
    use crate::config::Environment;

    fn policy() -> CookiePolicy {
        CookiePolicy::for_environment(Environment::Test)
    }

    #[test]
    fn safe_paths() {
        assert!(is_safe_internal_path("/settings"));
        assert!(is_safe_internal_path("/"));
        assert!(is_safe_internal_path("/scrap?tab=1"));
        assert!(!is_safe_internal_path("//evil.com"));
        assert!(!is_safe_internal_path("http://evil.com"));
        assert!(!is_safe_internal_path(""));
        assert!(!is_safe_internal_path("/\\evil.com"));
        assert!(!is_safe_internal_path("settings"));
        assert!(!is_safe_internal_path("/a\r\nSet-Cookie: x=y"));
    }

    #[test]
    fn remember_then_consume_once() {
        let jar = remember(SignedCookieJar::new(Key::generate()), policy(), Some("/ranking"));
        let (jar, first) = consume(jar, policy());
        assert_eq!(first.as_deref(), Some("/ranking"));
        let (_, second) = consume(jar, policy());
        assert_eq!(second, None);
    }

    #[test]
    fn unsafe_urls_are_not_remembered() {
        let jar = remember(
            SignedCookieJar::new(Key::generate()),
            policy(),
            Some("//evil.com"),
        );
        assert!(jar.get(COOKIE_RETURN_URL).is_none());
        let jar = remember(jar, policy(), None);
        assert!(consume(jar, policy()).1.is_none());
    }
}
