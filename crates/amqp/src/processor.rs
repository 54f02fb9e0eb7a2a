//! Per-delivery handling.
//!
//! [`MessageProcessor::process`] turns one inbound message into exactly one
//! reply. The delivery is acknowledged only after the reply was accepted by
//! the channel; if publishing fails the delivery stays unacknowledged and the
//! error is returned so the consumer can tear the channel down and let the
//! broker redeliver.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use scriptgate_core::dispatcher::Dispatcher;
use scriptgate_core::scripting::engine::ScriptEngine;
use scriptgate_core::status::InvocationStatus;
use scriptgate_events::{EventBus, InvocationEvent, Transport};

use crate::error::AmqpError;
use crate::message::{InboundMessage, Reply, HEADER_ENDPOINT, HEADER_EXECUTION_ID};

/// Where replies and acknowledgments are written.
///
/// Implementations serialize writes; concurrent deliveries share one channel.
pub trait ReplyChannel: Send + Sync {
    fn publish(&self, reply: &Reply) -> impl Future<Output = Result<(), AmqpError>> + Send;

    fn ack(&self, delivery_tag: u64) -> impl Future<Output = Result<(), AmqpError>> + Send;
}

pub struct MessageProcessor<E: ScriptEngine> {
    dispatcher: Dispatcher<E>,
    events: Arc<EventBus>,
}

impl<E: ScriptEngine> Clone for MessageProcessor<E> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            events: Arc::clone(&self.events),
        }
    }
}

impl<E: ScriptEngine> MessageProcessor<E> {
    pub fn new(dispatcher: Dispatcher<E>, events: Arc<EventBus>) -> Self {
        Self { dispatcher, events }
    }

    /// Handle one delivery: dispatch, reply, then acknowledge.
    ///
    /// Malformed messages (no correlation token, no or invalid endpoint,
    /// unparseable body) are answered with a bad-request reply, acknowledged,
    /// and never reach the pool. Returns the status sent back.
    pub async fn process<C: ReplyChannel>(
        &self,
        channel: &C,
        message: InboundMessage,
    ) -> Result<InvocationStatus, AmqpError> {
        let started = Instant::now();
        let correlation = message.correlation();
        let correlation_id = correlation.as_ref().map_or("", |c| c.as_str());
        let endpoint = message.header_text(HEADER_ENDPOINT).unwrap_or_default();

        tracing::info!(
            delivery_tag = message.delivery_tag,
            correlation_id,
            endpoint = %endpoint,
            redelivered = message.redelivered,
            body_bytes = message.body.len(),
            "Received request message",
        );

        let outcome = match &correlation {
            None => Err(format!(
                "ERROR: Missing correlation token: set the '{HEADER_EXECUTION_ID}' header \
                 or the correlation_id property"
            )),
            Some(token) => message
                .to_request(token.clone())
                .map_err(|err| format!("ERROR: {err}")),
        };

        let (status, body) = match outcome {
            Ok(request) => {
                let result = self.dispatcher.handle(request).await;
                (result.status(), result.body().to_string())
            }
            Err(body) => {
                tracing::warn!(
                    delivery_tag = message.delivery_tag,
                    correlation_id,
                    error = %body,
                    "Rejecting malformed request message",
                );
                (InvocationStatus::BadRequest, body)
            }
        };

        let reply = Reply::new(&message, correlation.as_ref(), status, body);
        self.events.publish(
            InvocationEvent::new(Transport::Amqp, endpoint, correlation_id, status.code())
                .with_elapsed(started.elapsed())
                .with_result_bytes(reply.body.len()),
        );

        channel.publish(&reply).await?;
        channel.ack(message.delivery_tag).await?;

        tracing::debug!(
            delivery_tag = message.delivery_tag,
            correlation_id,
            status = status.code(),
            "Reply published and request acknowledged",
        );
        Ok(status)
    }
}
