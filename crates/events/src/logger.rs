//! Structured request log.
//!
//! [`EventLogger`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! writes one `tracing` record per [`InvocationEvent`]. It runs as a
//! background task and exits when the bus is dropped.

use tokio::sync::broadcast;

use crate::bus::InvocationEvent;

pub struct EventLogger;

impl EventLogger {
    /// Run the logging loop until the channel closes.
    ///
    /// Returns the number of events written.
    pub async fn run(mut receiver: broadcast::Receiver<InvocationEvent>) -> u64 {
        let mut written = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    Self::record(&event);
                    written += 1;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some requests were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!(written, "Event bus closed, event logger shutting down");
                    break;
                }
            }
        }
        written
    }

    fn record(event: &InvocationEvent) {
        macro_rules! emit {
            ($level:ident) => {
                tracing::$level!(
                    transport = %event.transport,
                    target = %event.target,
                    correlation_id = %event.correlation_id,
                    status = event.status,
                    elapsed_ms = event.elapsed_ms,
                    result_bytes = event.result_bytes,
                    timestamp = %event.timestamp.to_rfc3339(),
                    "Request handled",
                )
            };
        }

        match event.status {
            500.. => emit!(error),
            400..=499 => emit!(warn),
            _ => emit!(info),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
