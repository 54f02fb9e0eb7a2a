//! Scriptgate invocation events.
//!
//! - [`EventBus`] - in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`InvocationEvent`] - one record per request handled by a front-end.
//! - [`EventLogger`] - background subscriber that writes every event as a
//!   structured log record.

pub mod bus;
pub mod logger;

pub use bus::{EventBus, InvocationEvent, Transport};
pub use logger::EventLogger;
