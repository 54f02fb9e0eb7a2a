//! Plain-text responses.
//!
//! Every invocation outcome, success or failure, is returned as the raw
//! result or error text with the matching status code.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use scriptgate_core::status::InvocationStatus;

pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

pub fn http_status(status: InvocationStatus) -> StatusCode {
    match status {
        InvocationStatus::Ok => StatusCode::OK,
        InvocationStatus::NoContent => StatusCode::NO_CONTENT,
        InvocationStatus::BadRequest => StatusCode::BAD_REQUEST,
        InvocationStatus::Unauthorized => StatusCode::UNAUTHORIZED,
        InvocationStatus::Forbidden => StatusCode::FORBIDDEN,
        InvocationStatus::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build a `text/plain` response. `204` never carries a body.
pub fn text(status: InvocationStatus, body: String) -> Response {
    let code = http_status(status);
    if code == StatusCode::NO_CONTENT {
        return code.into_response();
    }
    (
        code,
        [(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF8))],
        body,
    )
        .into_response()
}
