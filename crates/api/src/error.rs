use axum::response::{IntoResponse, Response};
use scriptgate_core::error::CoreError;
use scriptgate_core::status::InvocationStatus;

use crate::response;

/// Request rejections produced before the execution pool is involved.
///
/// The display text is exactly the body sent to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Auth is enabled and no credential was presented.
    #[error("ERROR: Authorization header missing!")]
    MissingCredential,

    /// A credential was presented but does not match.
    #[error("ERROR: Wrong auth token. Access denied!")]
    WrongCredential,

    /// Malformed target, query or body.
    #[error("ERROR: {0}")]
    BadRequest(#[from] CoreError),
}

/// Convenience type alias for handler helpers.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> InvocationStatus {
        match self {
            Self::MissingCredential => InvocationStatus::Unauthorized,
            Self::WrongCredential => InvocationStatus::Forbidden,
            Self::BadRequest(_) => InvocationStatus::BadRequest,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        response::text(self.status(), self.to_string())
    }
}
