//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between both front-ends.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// InvocationEvent
// ---------------------------------------------------------------------------

/// Front-end a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Http,
    Amqp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::Amqp => "amqp",
        })
    }
}

/// A request handled by one of the front-ends, accepted or rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationEvent {
    pub transport: Transport,

    /// Requested target as received. Empty when it could not be read.
    pub target: String,

    pub correlation_id: String,

    /// Numeric outcome code (200, 204, 400, 401, 403, 500).
    pub status: u16,

    /// Wall time from receipt to result.
    pub elapsed_ms: u64,

    /// Size of the returned body.
    pub result_bytes: usize,

    pub timestamp: DateTime<Utc>,
}

impl InvocationEvent {
    pub fn new(
        transport: Transport,
        target: impl Into<String>,
        correlation_id: impl Into<String>,
        status: u16,
    ) -> Self {
        Self {
            transport,
            target: target.into(),
            correlation_id: correlation_id.into(),
            status,
            elapsed_ms: 0,
            result_bytes: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn with_result_bytes(mut self, bytes: usize) -> Self {
        self.result_bytes = bytes;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use scriptgate_events::bus::{EventBus, InvocationEvent, Transport};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(InvocationEvent::new(Transport::Http, "ns/cmd", "abc", 200));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<InvocationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest unconsumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Publishing never blocks request handling; with no subscribers the
    /// event is dropped.
    pub fn publish(&self, event: InvocationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvocationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
