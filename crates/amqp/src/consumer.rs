//! Broker connection and consume loop.
//!
//! [`AmqpFrontEnd::run`] connects (with backoff), opens one channel, sets the
//! prefetch, and spawns a task per delivery. All replies and acks for a
//! connection go through a single [`LapinReplyChannel`], whose lock
//! serializes writes. A failed reply cancels the session: the channel is
//! closed so every unacknowledged delivery is redelivered, and the loop
//! reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use scriptgate_core::dispatcher::Dispatcher;
use scriptgate_core::scripting::engine::ScriptEngine;
use scriptgate_events::EventBus;

use crate::config::AmqpConfig;
use crate::error::AmqpError;
use crate::message::{InboundMessage, Reply};
use crate::processor::{MessageProcessor, ReplyChannel};
use crate::reconnect::{reconnect_loop, ReconnectConfig};

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

/// Shared flag reporting whether the consumer currently holds a live channel.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus(Arc<AtomicBool>);

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Reply channel
// ---------------------------------------------------------------------------

/// [`ReplyChannel`] over a lapin channel.
pub struct LapinReplyChannel {
    channel: Mutex<Channel>,
    exchange: String,
    routing_key: String,
}

impl LapinReplyChannel {
    pub fn new(channel: Channel, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            channel: Mutex::new(channel),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    async fn close(&self) {
        let channel = self.channel.lock().await;
        if channel.status().connected() {
            if let Err(e) = channel.close(200, "closing").await {
                tracing::debug!(error = %e, "Channel close failed");
            }
        }
    }
}

impl ReplyChannel for LapinReplyChannel {
    async fn publish(&self, reply: &Reply) -> Result<(), AmqpError> {
        let channel = self.channel.lock().await;
        if !channel.status().connected() {
            return Err(AmqpError::Unavailable("channel is closed".into()));
        }
        channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &reply.body,
                reply.properties(),
            )
            .await
            .map_err(AmqpError::Publish)?
            .await
            .map_err(AmqpError::Publish)?;
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        let channel = self.channel.lock().await;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|source| AmqpError::Ack {
                delivery_tag,
                source,
            })
    }
}

// ---------------------------------------------------------------------------
// Front-end
// ---------------------------------------------------------------------------

/// Why a consume session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Lost,
}

pub struct AmqpFrontEnd<E: ScriptEngine> {
    config: AmqpConfig,
    processor: MessageProcessor<E>,
    reconnect: ReconnectConfig,
    status: ConnectionStatus,
}

impl<E: ScriptEngine> AmqpFrontEnd<E> {
    pub fn new(config: AmqpConfig, dispatcher: Dispatcher<E>, events: Arc<EventBus>) -> Self {
        Self {
            config,
            processor: MessageProcessor::new(dispatcher, events),
            reconnect: ReconnectConfig::default(),
            status: ConnectionStatus::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Handle for the health route; stays valid after `run` consumes `self`.
    pub fn status(&self) -> ConnectionStatus {
        self.status.clone()
    }

    /// Consume until `cancel` fires, reconnecting whenever the connection or
    /// channel is lost. In-flight deliveries finish before this returns.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            uri = %self.config.display_uri(),
            queue = %self.config.request_queue,
            exchange = %self.config.response_exchange,
            routing_key = %self.config.response_routing_key,
            prefetch = self.config.prefetch,
            "Starting AMQP front-end",
        );

        loop {
            let Some(connection) =
                reconnect_loop(|| self.connect(), &self.reconnect, &cancel).await
            else {
                break;
            };

            let end = match self.serve(&connection, &cancel).await {
                Ok(end) => end,
                Err(e) => {
                    tracing::warn!(error = %e, "AMQP session setup failed");
                    SessionEnd::Lost
                }
            };
            self.status.set(false);

            if connection.status().connected() {
                if let Err(e) = connection.close(200, "scriptgate stopping").await {
                    tracing::debug!(error = %e, "Connection close failed");
                }
            }

            if end == SessionEnd::Shutdown {
                break;
            }
            tracing::warn!("AMQP session lost, reconnecting");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect.initial_delay) => {}
            }
        }

        tracing::info!("AMQP front-end stopped");
    }

    async fn connect(&self) -> Result<Connection, AmqpError> {
        Connection::connect(&self.config.connection_uri(), ConnectionProperties::default())
            .await
            .map_err(AmqpError::Connect)
    }

    async fn serve(
        &self,
        connection: &Connection,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, AmqpError> {
        let channel = connection.create_channel().await.map_err(AmqpError::Channel)?;
        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await
            .map_err(AmqpError::Channel)?;

        let mut consumer = channel
            .basic_consume(
                &self.config.request_queue,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| AmqpError::Consume {
                queue: self.config.request_queue.clone(),
                source,
            })?;

        let replies = Arc::new(LapinReplyChannel::new(
            channel,
            self.config.response_exchange.clone(),
            self.config.response_routing_key.clone(),
        ));
        let session = cancel.child_token();
        let tasks = TaskTracker::new();

        self.status.set(true);
        tracing::info!(queue = %self.config.request_queue, "Waiting for request messages");

        loop {
            tokio::select! {
                _ = session.cancelled() => break,
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => {
                        let message = InboundMessage::from_delivery(&delivery);
                        let processor = self.processor.clone();
                        let replies = Arc::clone(&replies);
                        let session = session.clone();
                        tasks.spawn(async move {
                            let delivery_tag = message.delivery_tag;
                            if let Err(e) = processor.process(replies.as_ref(), message).await {
                                tracing::error!(
                                    delivery_tag,
                                    error = %e,
                                    "Reply failed, closing channel for redelivery",
                                );
                                session.cancel();
                            }
                        });
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Consumer stream error");
                        break;
                    }
                    None => {
                        tracing::warn!("Consumer stream ended");
                        break;
                    }
                },
            }
        }

        // Stop feeding new work, let accepted deliveries reply, then close.
        tasks.close();
        tasks.wait().await;
        replies.close().await;

        Ok(if cancel.is_cancelled() {
            SessionEnd::Shutdown
        } else {
            SessionEnd::Lost
        })
    }
}
