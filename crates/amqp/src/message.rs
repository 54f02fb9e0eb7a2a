//! Request and reply message shapes.
//!
//! A request carries the target in the `endpoint` header, the correlation
//! token in the `executionId` header (falling back to the `correlation_id`
//! property) and its parameters as a JSON object body. A message with neither
//! correlation source is answered as a bad request. The reply echoes the
//! request headers, adds `statusCode`, and is published persistent.

use lapin::message::Delivery;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::BasicProperties;

use scriptgate_core::error::CoreError;
use scriptgate_core::invocation::{CorrelationToken, InvocationRequest, Parameters, Target};
use scriptgate_core::params::parse_json_body;
use scriptgate_core::status::InvocationStatus;

pub const HEADER_EXECUTION_ID: &str = "executionId";
pub const HEADER_ENDPOINT: &str = "endpoint";
pub const HEADER_STATUS_CODE: &str = "statusCode";

pub const REPLY_CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode 2: the broker persists the reply.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// The parts of a delivery the front-end needs, detached from the client
/// library's delivery type.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub headers: FieldTable,
    pub correlation_id: Option<String>,
    pub redelivered: bool,
    pub body: Vec<u8>,
}

impl InboundMessage {
    pub fn from_delivery(delivery: &Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            headers: delivery.properties.headers().clone().unwrap_or_default(),
            correlation_id: delivery
                .properties
                .correlation_id()
                .as_ref()
                .map(|id| id.as_str().to_string()),
            redelivered: delivery.redelivered,
            body: delivery.data.clone(),
        }
    }

    /// Text value of a header sent as a long string, short string or byte
    /// array.
    pub fn header_text(&self, name: &str) -> Option<String> {
        let value = self.headers.inner().get(&ShortString::from(name))?;
        match value {
            AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
            AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
            AMQPValue::ByteArray(b) => Some(String::from_utf8_lossy(b.as_slice()).into_owned()),
            _ => None,
        }
    }

    /// `executionId` header, then the `correlation_id` property. `None` when
    /// the sender supplied neither; such a message cannot be matched to a
    /// reply and is rejected.
    pub fn correlation(&self) -> Option<CorrelationToken> {
        self.header_text(HEADER_EXECUTION_ID)
            .filter(|id| !id.is_empty())
            .or_else(|| self.correlation_id.clone().filter(|id| !id.is_empty()))
            .map(CorrelationToken::new)
    }

    /// Normalize into an invocation request.
    ///
    /// An empty (or whitespace-only) body means no parameters.
    pub fn to_request(&self, correlation: CorrelationToken) -> Result<InvocationRequest, CoreError> {
        let endpoint = self
            .header_text(HEADER_ENDPOINT)
            .ok_or_else(|| CoreError::InvalidTarget(format!("missing '{HEADER_ENDPOINT}' header")))?;
        let target = Target::parse(&endpoint)?;

        let parameters = if self.body.iter().all(u8::is_ascii_whitespace) {
            Parameters::new()
        } else {
            parse_json_body(&self.body)?
        };

        Ok(InvocationRequest::new(target, parameters, correlation))
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Reply {
    /// Request headers plus `statusCode`.
    pub headers: FieldTable,
    /// Echoed token; absent only when rejecting an uncorrelated request.
    pub correlation_id: Option<String>,
    pub status: InvocationStatus,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn new(
        inbound: &InboundMessage,
        correlation: Option<&CorrelationToken>,
        status: InvocationStatus,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        let mut headers = inbound.headers.clone();
        headers.insert(
            ShortString::from(HEADER_STATUS_CODE),
            AMQPValue::LongInt(i32::from(status.code())),
        );
        Self {
            headers,
            correlation_id: correlation.map(|c| c.as_str().to_string()),
            status,
            body: body.into(),
        }
    }

    /// `statusCode` as carried in the headers.
    pub fn status_code(&self) -> Option<i32> {
        match self.headers.inner().get(&ShortString::from(HEADER_STATUS_CODE)) {
            Some(AMQPValue::LongInt(code)) => Some(*code),
            _ => None,
        }
    }

    pub fn properties(&self) -> BasicProperties {
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(REPLY_CONTENT_TYPE))
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_headers(self.headers.clone());
        match &self.correlation_id {
            Some(id) => properties.with_correlation_id(ShortString::from(id.clone())),
            None => properties,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
