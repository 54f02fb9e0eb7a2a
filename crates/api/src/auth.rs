//! Shared-secret credential check.
//!
//! When a token is configured, every invocation must present it verbatim in
//! the configured header. Missing (or empty) is 401, anything else that does
//! not match is 403. With no token configured every request is accepted.

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Expected credential. `None` disables the check.
    pub token: Option<String>,
    /// Header the credential is read from.
    pub header: HeaderName,
}

impl AuthConfig {
    pub fn disabled() -> Self {
        Self {
            token: None,
            header: AUTHORIZATION,
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: (!token.is_empty()).then_some(token),
            header: AUTHORIZATION,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// The credential presented in `headers`, if any.
    pub fn presented(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(&self.header)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
    }
}

/// Check `presented` against the configured token.
pub fn check_credential(config: &AuthConfig, presented: Option<&str>) -> AppResult<()> {
    let Some(expected) = config.token.as_deref() else {
        return Ok(());
    };

    match presented {
        None | Some("") => Err(AppError::MissingCredential),
        Some(token) if token == expected => Ok(()),
        Some(token) => {
            tracing::warn!(
                header = %config.header,
                presented_len = token.len(),
                "Wrong auth token received, access denied",
            );
            Err(AppError::WrongCredential)
        }
    }
}
