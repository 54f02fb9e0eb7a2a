//! Catch-all invocation handler.
//!
//! Any method on any path runs the script named by the path. Parameters come
//! from a JSON object body when one is sent, otherwise from the query string.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::response::Response;

use scriptgate_core::invocation::{CorrelationToken, InvocationRequest, Target};
use scriptgate_core::params::{parse_json_body, parse_query};
use scriptgate_core::result::ExecutionResult;
use scriptgate_core::scripting::engine::ScriptEngine;
use scriptgate_events::{InvocationEvent, Transport};

use crate::auth::check_credential;
use crate::error::AppResult;
use crate::response;
use crate::state::AppState;

/// Header carrying the per-request id set by the request-id middleware.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// `ANY /{*path}`
pub async fn invoke<E: ScriptEngine>(
    State(state): State<AppState<E>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let correlation = correlation_from(&headers);

    let (status, text) = match run(&state, &uri, &headers, &body, correlation.clone()).await {
        Ok(result) => (result.status(), result.body().to_string()),
        Err(err) => {
            tracing::warn!(
                correlation_id = %correlation,
                path = %uri.path(),
                error = %err,
                "Request rejected",
            );
            (err.status(), err.to_string())
        }
    };

    state.event_bus.publish(
        InvocationEvent::new(
            Transport::Http,
            uri.path().trim_start_matches('/'),
            correlation.as_str(),
            status.code(),
        )
        .with_elapsed(started.elapsed())
        .with_result_bytes(text.len()),
    );

    response::text(status, text)
}

async fn run<E: ScriptEngine>(
    state: &AppState<E>,
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
    correlation: CorrelationToken,
) -> AppResult<ExecutionResult> {
    let credential = state.auth.presented(headers);
    check_credential(&state.auth, credential.as_deref())?;

    let target = Target::parse_encoded(uri.path())?;
    let parameters = if body.is_empty() {
        parse_query(uri.query())?
    } else {
        parse_json_body(body)?
    };

    let request = InvocationRequest::new(target, parameters, correlation).with_credential(credential);
    Ok(state.dispatcher.handle(request).await)
}

/// The request id assigned by the middleware, or a fresh token when the
/// handler is driven without it.
fn correlation_from(headers: &HeaderMap) -> CorrelationToken {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(CorrelationToken::new)
        .unwrap_or_else(CorrelationToken::generate)
}
