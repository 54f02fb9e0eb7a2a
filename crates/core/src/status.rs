//! Transport-neutral outcome codes.
//!
//! Both front-ends report the same numeric codes: the HTTP front-end as the
//! response status, the AMQP front-end as the `statusCode` reply header.

use serde::Serialize;

use crate::result::ExecutionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Success with a non-empty body.
    Ok,
    /// Success with nothing to return.
    NoContent,
    /// Malformed target, query or payload. The pool was never invoked.
    BadRequest,
    /// A credential is required but none was presented.
    Unauthorized,
    /// A credential was presented but does not match.
    Forbidden,
    /// Engine-reported failure or engine-level fault.
    ServerError,
}

impl InvocationStatus {
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::NoContent => 204,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::ServerError => 500,
        }
    }

    pub fn for_result(result: &ExecutionResult) -> Self {
        match (result.succeeded, result.output.is_empty()) {
            (true, false) => Self::Ok,
            (true, true) => Self::NoContent,
            (false, _) => Self::ServerError,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
