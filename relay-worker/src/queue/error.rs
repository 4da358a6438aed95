//! Queue-layer errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to connect to RabbitMQ: {0}")]
    Connect(#[source] lapin::Error),

    #[error("failed to open channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("failed to declare queue {queue}: {source}")]
    Declare {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to publish to {queue}: {source}")]
    Publish {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("broker rejected publish to {0}")]
    Rejected(String),

    #[error("failed to ack delivery: {0}")]
    Ack(#[source] lapin::Error),

    #[error("failed to nack delivery: {0}")]
    Nack(#[source] lapin::Error),
}
