/// Transport faults of the AMQP front-end.
///
/// Request-level problems (bad headers, bad body, engine failure) are never
/// errors here: they are answered with a reply carrying the matching status.
#[derive(Debug, thiserror::Error)]
pub enum AmqpError {
    #[error("Failed to connect to broker: {0}")]
    Connect(#[source] lapin::Error),

    #[error("Channel setup failed: {0}")]
    Channel(#[source] lapin::Error),

    #[error("Failed to start consuming from '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("Failed to publish reply: {0}")]
    Publish(#[source] lapin::Error),

    #[error("Failed to acknowledge delivery {delivery_tag}: {source}")]
    Ack {
        delivery_tag: u64,
        #[source]
        source: lapin::Error,
    },

    #[error("Reply channel unavailable: {0}")]
    Unavailable(String),
}
