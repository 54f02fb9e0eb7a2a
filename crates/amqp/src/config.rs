//! Broker addressing for the AMQP front-end.

use std::fmt;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Default consumer prefetch (unacknowledged deliveries in flight).
pub const DEFAULT_PREFETCH: u16 = 16;

/// Default consumer tag.
pub const DEFAULT_CONSUMER_TAG: &str = "scriptgate";

#[derive(Clone)]
pub struct AmqpConfig {
    /// Broker URI, e.g. `amqp://broker:5672/%2f`.
    pub uri: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_queue: String,
    pub response_exchange: String,
    pub response_routing_key: String,
    pub prefetch: u16,
    pub consumer_tag: String,
}

impl AmqpConfig {
    pub fn new(
        uri: impl Into<String>,
        request_queue: impl Into<String>,
        response_exchange: impl Into<String>,
        response_routing_key: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            username: None,
            password: None,
            request_queue: request_queue.into(),
            response_exchange: response_exchange.into(),
            response_routing_key: response_routing_key.into(),
            prefetch: DEFAULT_PREFETCH,
            consumer_tag: DEFAULT_CONSUMER_TAG.to_string(),
        }
    }

    /// URI handed to the client library.
    ///
    /// Separately configured credentials are injected as userinfo unless the
    /// URI already carries its own.
    pub fn connection_uri(&self) -> String {
        let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) else {
            return self.uri.clone();
        };
        let Some((scheme, rest)) = self.uri.split_once("://") else {
            return self.uri.clone();
        };
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.contains('@') {
            return self.uri.clone();
        }

        let mut userinfo = utf8_percent_encode(username, NON_ALPHANUMERIC).to_string();
        if let Some(password) = self.password.as_deref() {
            userinfo.push(':');
            userinfo.extend(utf8_percent_encode(password, NON_ALPHANUMERIC));
        }
        format!("{scheme}://{userinfo}@{rest}")
    }

    /// URI with any userinfo removed, for logging.
    pub fn display_uri(&self) -> String {
        let Some((scheme, rest)) = self.uri.split_once("://") else {
            return self.uri.clone();
        };
        let authority_end = rest.find('/').unwrap_or(rest.len());
        match rest[..authority_end].rfind('@') {
            Some(at) => format!("{scheme}://{}", &rest[at + 1..]),
            None => self.uri.clone(),
        }
    }
}

impl fmt::Debug for AmqpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpConfig")
            .field("uri", &self.display_uri())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("request_queue", &self.request_queue)
            .field("response_exchange", &self.response_exchange)
            .field("response_routing_key", &self.response_routing_key)
            .field("prefetch", &self.prefetch)
            .finish()
    }
}
