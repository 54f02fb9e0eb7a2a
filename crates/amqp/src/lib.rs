//! Asynchronous (AMQP) front-end.
//!
//! Consumes invocation requests from a queue, runs them through the shared
//! dispatcher, publishes a reply carrying the outcome code, and acknowledges
//! the request only once that reply has been handed to the broker.

pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod processor;
pub mod reconnect;

pub use config::AmqpConfig;
pub use consumer::{AmqpFrontEnd, ConnectionStatus};
pub use error::AmqpError;
pub use processor::{MessageProcessor, ReplyChannel};
