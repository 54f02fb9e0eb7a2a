//! Canonical request values shared by every front-end.
//!
//! A front-end turns its transport-native request into an
//! [`InvocationRequest`]: a validated [`Target`], an ordered set of
//! [`Parameters`], a [`CorrelationToken`] it minted itself, and the optional
//! credential the caller presented.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Hierarchical name of a script: namespace segments followed by the command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Target {
    segments: Vec<String>,
}

impl Target {
    /// Build a target from already-decoded segments.
    ///
    /// Fails if there are no segments or if any segment could escape the
    /// scripts root once resolved to a filesystem path.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(CoreError::InvalidTarget(
                "no script name was given".to_string(),
            ));
        }
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self { segments })
    }

    /// Parse a slash-separated path such as `reports/daily` or `/reports/daily/`.
    ///
    /// Empty pieces (leading, trailing or doubled separators) are ignored, so
    /// the final non-empty piece is the command name.
    pub fn parse(path: &str) -> Result<Self, CoreError> {
        Self::from_segments(path.split('/').filter(|s| !s.is_empty()))
    }

    /// Parse a percent-encoded URI path, decoding each segment separately.
    ///
    /// Decoding happens after splitting so an encoded `%2F` cannot introduce
    /// an extra path level; it is rejected by segment validation instead.
    pub fn parse_encoded(path: &str) -> Result<Self, CoreError> {
        let decoded = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                percent_encoding::percent_decode_str(s)
                    .decode_utf8()
                    .map(|cow| cow.into_owned())
                    .map_err(|_| {
                        CoreError::InvalidTarget(format!(
                            "segment '{s}' is not valid UTF-8 once decoded"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_segments(decoded)
    }

    /// The command name (final segment).
    pub fn command(&self) -> &str {
        // Construction guarantees at least one segment.
        &self.segments[self.segments.len() - 1]
    }

    /// All segments before the command name.
    pub fn namespace(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Reject segments that are empty, relative (`.`/`..`), or carry path or
/// drive separators and control characters.
fn validate_segment(segment: &str) -> Result<(), CoreError> {
    if segment.is_empty() {
        return Err(CoreError::InvalidTarget(
            "empty path segment".to_string(),
        ));
    }
    if segment == "." || segment == ".." {
        return Err(CoreError::InvalidTarget(format!(
            "segment '{segment}' is not allowed"
        )));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
    {
        return Err(CoreError::InvalidTarget(format!(
            "segment '{}' contains forbidden character {c:?}",
            segment.escape_debug()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Named string parameters passed to a script, in insertion order.
///
/// A `None` value is a flag-only parameter (`-Verbose` rather than
/// `-Name value`). Names must be valid PowerShell parameter identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Parameters(IndexMap<String, Option<String>>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter. Invalid names and repeated names are rejected.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: Option<String>,
    ) -> Result<(), CoreError> {
        let name = name.into();
        if !is_valid_parameter_name(&name) {
            return Err(CoreError::InvalidParameters(format!(
                "'{}' is not a valid parameter name",
                name.escape_debug()
            )));
        }
        if self.0.contains_key(&name) {
            return Err(CoreError::InvalidParameters(format!(
                "parameter '{name}' was given more than once"
            )));
        }
        self.0.insert(name, value);
        Ok(())
    }

    /// Look up a parameter. The outer `Option` is presence, the inner one
    /// distinguishes a flag from a valued parameter.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.0.get(name).map(|v| v.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, at most 128 characters.
pub fn is_valid_parameter_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 128
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// CorrelationToken
// ---------------------------------------------------------------------------

/// Opaque value tying a result back to the request that produced it.
///
/// Minted by front-ends (from a request id or message header), never by the
/// execution pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// A fresh, time-ordered token (UUID v7).
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// InvocationRequest
// ---------------------------------------------------------------------------

/// A normalized request produced by any front-end.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub target: Target,
    pub parameters: Parameters,
    pub correlation: CorrelationToken,
    /// Credential presented by the caller. `Some("")` is an empty header,
    /// which is distinct from no header at all.
    pub credential: Option<String>,
}

impl InvocationRequest {
    pub fn new(target: Target, parameters: Parameters, correlation: CorrelationToken) -> Self {
        Self {
            target,
            parameters,
            correlation,
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_splits_namespace_and_command() {
        let target = Target::parse("/reports/daily").expect("valid target");
        assert_eq!(target.command(), "daily");
        assert_eq!(target.namespace(), ["reports".to_string()]);
        assert_eq!(target.to_string(), "reports/daily");
    }

    #[test]
    fn parse_ignores_trailing_and_doubled_separators() {
        let target = Target::parse("reports//weekly/summary/").expect("valid target");
        assert_eq!(target.segments(), ["reports", "weekly", "summary"]);
        assert_eq!(target.command(), "summary");
    }

    #[test]
    fn single_segment_has_empty_namespace() {
        let target = Target::parse("cleanup").expect("valid target");
        assert!(target.namespace().is_empty());
        assert_eq!(target.command(), "cleanup");
    }

    #[test]
    fn empty_path_is_rejected() {
        assert_matches!(Target::parse("/"), Err(CoreError::InvalidTarget(_)));
        assert_matches!(Target::parse(""), Err(CoreError::InvalidTarget(_)));
    }

    #[test]
    fn relative_segments_are_rejected() {
        assert_matches!(Target::parse("../secrets"), Err(CoreError::InvalidTarget(_)));
        assert_matches!(Target::parse("a/./b"), Err(CoreError::InvalidTarget(_)));
    }

    #[test]
    fn separators_and_drive_letters_are_rejected() {
        assert_matches!(
            Target::from_segments(["a\\b"]),
            Err(CoreError::InvalidTarget(_))
        );
        assert_matches!(
            Target::from_segments(["C:", "x"]),
            Err(CoreError::InvalidTarget(_))
        );
        assert_matches!(
            Target::from_segments(["tab\there"]),
            Err(CoreError::InvalidTarget(_))
        );
    }

    #[test]
    fn parse_encoded_decodes_each_segment() {
        let target = Target::parse_encoded("/monthly%20reports/run").expect("valid target");
        assert_eq!(target.segments(), ["monthly reports", "run"]);
    }

    #[test]
    fn encoded_slash_cannot_add_a_level() {
        assert_matches!(
            Target::parse_encoded("/a%2Fb"),
            Err(CoreError::InvalidTarget(_))
        );
        assert_matches!(
            Target::parse_encoded("/%2E%2E/x"),
            Err(CoreError::InvalidTarget(_))
        );
    }

    #[test]
    fn parameters_keep_insertion_order() {
        let mut params = Parameters::new();
        params.insert("zeta", Some("1".into())).unwrap();
        params.insert("alpha", None).unwrap();
        params.insert("mid", Some("x".into())).unwrap();

        let names: Vec<_> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert_eq!(params.get("alpha"), Some(None));
        assert_eq!(params.get("zeta"), Some(Some("1")));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn parameter_names_must_be_identifiers() {
        let mut params = Parameters::new();
        assert_matches!(
            params.insert("1abc", None),
            Err(CoreError::InvalidParameters(_))
        );
        assert_matches!(
            params.insert("a b", None),
            Err(CoreError::InvalidParameters(_))
        );
        assert_matches!(
            params.insert("x;rm", None),
            Err(CoreError::InvalidParameters(_))
        );
        assert_matches!(params.insert("", None), Err(CoreError::InvalidParameters(_)));
        assert!(params.insert("_Private9", None).is_ok());
    }

    #[test]
    fn duplicate_parameter_is_rejected() {
        let mut params = Parameters::new();
        params.insert("env", Some("prod".into())).unwrap();
        assert_matches!(
            params.insert("env", Some("dev".into())),
            Err(CoreError::InvalidParameters(_))
        );
        assert_eq!(params.get("env"), Some(Some("prod")));
    }

    #[test]
    fn generated_tokens_are_unique() {
        let a = CorrelationToken::generate();
        let b = CorrelationToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn empty_credential_is_distinct_from_absent() {
        let target = Target::parse("a").unwrap();
        let req = InvocationRequest::new(target, Parameters::new(), CorrelationToken::new("c"));
        assert!(req.credential.is_none());
        let req = req.with_credential(Some(String::new()));
        assert_eq!(req.credential.as_deref(), Some(""));
    }
}
