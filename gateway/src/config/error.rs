use thiserror::Error;

/// Startup-time configuration problems. None of these are recoverable per request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("session secret is not configured (set [session].secret or SESSION_SECRET)")]
    MissingSecret,
    #[error("session secret must be at least {min} characters long")]
    WeakSecret { min: usize },
    #[error("session lifetime must be between 1 and {max} days")]
    LifetimeOutOfRange { max: u32 },
    #[error("kakao {0} is not configured")]
    MissingProvider(&'static str),
    #[error("kakao {field} is not a valid URL")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("kakao {0} must be an absolute http(s) URL")]
    UnsupportedUrl(&'static str),
    #[error("unknown environment {0:?} (expected development, production or test)")]
    UnknownEnvironment(String),
}
