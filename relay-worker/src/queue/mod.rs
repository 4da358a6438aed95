//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - The message payload and its send/retry options
//! - The `QueueSender` and `Envelope` seams the handlers are written against
//! - RabbitMQ implementations of both
//!
//! ## Architecture
//!
//! ```text
//! POST /api/email → Publisher → {queue}.delay.1s → (TTL) → {queue} → Worker
//!                                 ▲                                  │
//!                                 └──── {queue}.delay.5s ◄── retry ──┘
//! ```

use async_trait::async_trait;

pub mod envelope;
pub mod error;
pub mod publisher;
pub mod types;

pub use envelope::{
    DeliveryAcker, DeliveryParts, Envelope, MessageBatch, RabbitEnvelope, Redelivery,
};
pub use error::QueueError;
pub use publisher::Publisher;
pub use types::{
    QueueMessage, RetryOptions, SendOptions, EMAIL_QUEUE, ENQUEUE_DELAY_SECONDS,
    RETRY_COUNT_HEADER, RETRY_DELAY_SECONDS,
};

/// Submits messages to a queue.
///
/// Failures are reported through the error; nothing is returned on success.
#[async_trait]
pub trait QueueSender: Send + Sync {
    async fn send(&self, message: &QueueMessage, options: SendOptions) -> Result<(), QueueError>;
}
