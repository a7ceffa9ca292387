use core::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::FromRef as _,
    http::{
        Request, StatusCode,
        header::{AUTHORIZATION, COOKIE},
    },
    middleware::{self as ax_middleware},
    response::Redirect,
    routing::{self, IntoMakeService, get},
};
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt as _, request_id::MakeRequestUuid, timeout::TimeoutLayer, trace::TraceLayer,
};

use crate::{
    app::AppState,
    http::{
        account,
        auth::{self, GateState},
        login, pages,
        server::middleware::{LevelAdjustingOnFailure, secure_headers_middleware},
    },
};

/// Creates the main application router by merging public and gated routes.
///
/// Public routes drive the Kakao round trip, logout and the JSON endpoints, which answer
/// with status codes instead of redirects. Gated routes are the pages, including the
/// login page itself, and run through [`auth::require`].
pub(crate) fn create_app_router(gate: GateState) -> Router<AppState> {
    let public = Router::new()
        .merge(login::routes())
        .merge(account::api_routes())
        .route("/healthz", get(pages::healthz));

    let gated = Router::new()
        .merge(pages::routes())
        .merge(login::page_routes())
        .merge(account::routes())
        .route_layer(ax_middleware::from_fn_with_state(gate, auth::require));

    public.merge(gated)
}

/// The fully layered router, without the make-service wrapper.
pub(crate) fn build_router(app_state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .sensitive_headers([AUTHORIZATION, COOKIE])
        .set_x_request_id(MakeRequestUuid)
        .propagate_x_request_id()
        .layer(TraceLayer::new_for_http().on_failure(LevelAdjustingOnFailure))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(ax_middleware::from_fn(secure_headers_middleware));

    let gate = GateState::from_ref(&app_state);

    create_app_router(gate)
        .with_state(app_state)
        .fallback(routing::any(|req: Request<Body>| async move {
            tracing::warn!(method = %req.method(), uri = %req.uri(), "Unhandled request");
            Redirect::temporary("/")
        }))
        .layer(middleware_stack)
}

pub(crate) fn create_app(app_state: AppState) -> IntoMakeService<Router<()>> {
    build_router(app_state).into_make_service()
}
