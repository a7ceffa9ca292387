use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
};

/// Custom failure handling for the trace layer. 503 responses are logged
/// at `INFO` instead of `ERROR` so they don't fill the error log.
#[derive(Clone, Copy)]
pub(crate) struct LevelAdjustingOnFailure;

impl tower_http::trace::OnFailure<tower_http::classify::ServerErrorsFailureClass>
    for LevelAdjustingOnFailure
{
    fn on_failure(
        &mut self,
        failure_classification: tower_http::classify::ServerErrorsFailureClass,
        latency: core::time::Duration,
        span: &tracing::Span,
    ) {
        use tower_http::classify::ServerErrorsFailureClass as S;

        match failure_classification {
            S::StatusCode(StatusCode::SERVICE_UNAVAILABLE) => {
                tracing::info!(classification = %S::StatusCode(StatusCode::SERVICE_UNAVAILABLE), latency = %format!("{} ms", latency.as_millis()), "response failed (downgraded)");
            }
            value => {
                tower_http::trace::DefaultOnFailure::default().on_failure(value, latency, span);
            }
        }
    }
}

/// Middleware to set security headers on all responses.
///
/// Pages are plain server-rendered HTML without scripts, so the policy allows no script
/// source at all. Images may come from the Kakao CDN for profile pictures.
pub(crate) async fn secure_headers_middleware(
    req: Request<Body>,
    next: Next,
) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static(concat!(
            "default-src 'self'; ",
            "script-src 'none'; ",
            "img-src 'self' https://*.kakaocdn.net; ",
            "style-src 'self'; ",
            "object-src 'none'; ",
            "base-uri 'none'; ",
            "frame-ancestors 'none'; ",
            "form-action 'self'",
        )),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}
