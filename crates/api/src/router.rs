use std::time::Duration;

use axum::http::{HeaderName, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use scriptgate_core::scripting::engine::ScriptEngine;

use crate::handlers::invoke::{invoke, REQUEST_ID_HEADER};
use crate::routes;
use crate::state::AppState;

/// Build the HTTP application with its middleware stack.
///
/// `request_timeout` bounds the whole request (408) on top of any pool-level
/// invocation timeout.
pub fn build_router<E: ScriptEngine>(
    state: AppState<E>,
    request_timeout: Option<Duration>,
) -> Router {
    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    let mut router = Router::new()
        .merge(routes::health::router())
        .fallback(invoke::<E>)
        // -- Middleware stack (applied bottom-up) --
        // Panic recovery: an unexpected panic becomes a 500.
        .layer(CatchPanicLayer::new());

    if let Some(timeout) = request_timeout {
        router = router.layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ));
    }

    router
        // Propagate request ID to response.
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        // Structured request/response tracing.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Set request ID on incoming requests; it doubles as the correlation token.
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}
