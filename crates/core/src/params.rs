//! Parameter extraction from URI queries and structured (JSON) bodies.
//!
//! Both sources produce the same [`Parameters`] value, so a query string and
//! an equivalent JSON body converge on the same invocation.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::CoreError;
use crate::invocation::Parameters;

/// Parse a URI query string into parameters.
///
/// - `key=value` pairs are percent-decoded (`+` is left as-is).
/// - A bare `key` is a flag parameter with a `None` value.
/// - A segment that is neither (`a=1=2`, `=5`) is dropped with a warning.
/// - A leading `?` is tolerated and empty segments are skipped.
///
/// Repeated names, invalid parameter names and sequences that do not decode
/// to UTF-8 fail the whole query.
pub fn parse_query(query: Option<&str>) -> Result<Parameters, CoreError> {
    let mut params = Parameters::new();
    let Some(query) = query else {
        return Ok(params);
    };

    for segment in query.trim_start_matches('?').split('&') {
        if segment.is_empty() {
            continue;
        }

        let mut parts = segment.split('=');
        let raw_key = parts.next().unwrap_or_default();
        let raw_value = parts.next();
        if parts.next().is_some() {
            tracing::warn!(segment, "Unable to parse query parameter, dropping it");
            continue;
        }

        let key = decode_component(raw_key.trim_matches(&['?', ' '][..]))?;
        if key.is_empty() {
            tracing::warn!(segment, "Query parameter has no name, dropping it");
            continue;
        }
        let value = raw_value
            .map(|v| decode_component(v.trim()))
            .transpose()?;

        params.insert(key, value).map_err(|e| match e {
            CoreError::InvalidParameters(msg) => CoreError::InvalidQuery(msg),
            other => other,
        })?;
    }

    Ok(params)
}

/// Parse a JSON object body into parameters.
///
/// String values pass through, numbers and booleans are stringified, and
/// `null` becomes a flag parameter. Arrays and nested objects are rejected.
/// Key order in the body is preserved.
pub fn parse_json_body(body: &[u8]) -> Result<Parameters, CoreError> {
    let map: IndexMap<String, Value> = serde_json::from_slice(body).map_err(|e| {
        CoreError::InvalidParameters(format!("body must be a JSON object: {e}"))
    })?;

    let mut params = Parameters::new();
    for (key, value) in map {
        let value = match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Array(_) | Value::Object(_) => {
                return Err(CoreError::InvalidParameters(format!(
                    "parameter '{key}' must be a string, number, boolean or null"
                )));
            }
        };
        params.insert(key, value)?;
    }
    Ok(params)
}

/// Percent-decode one query component into UTF-8.
///
/// Malformed escapes (`%zz`) are kept literally; only byte sequences that
/// decode to invalid UTF-8 are an error.
fn decode_component(raw: &str) -> Result<String, CoreError> {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|_| {
            CoreError::InvalidQuery(format!("'{raw}' is not valid UTF-8 once decoded"))
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
