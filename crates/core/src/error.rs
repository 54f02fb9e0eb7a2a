/// Errors raised while normalizing inbound requests, before any engine work.
///
/// Every variant is a client error: front-ends map them to a bad-request
/// outcome and never forward the request to the execution pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}
