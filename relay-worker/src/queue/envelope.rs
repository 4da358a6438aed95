//! Delivered messages and their ack/retry controls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions},
    types::{AMQPValue, FieldTable},
};
use tracing::{error, warn};

use super::error::QueueError;
use super::publisher::Publisher;
use super::types::{QueueMessage, RetryOptions, RETRY_COUNT_HEADER};

/// Wrapper around one delivered message.
///
/// The body is read-only. Exactly one of `ack` or `retry` is expected per
/// delivery; a message that gets neither stays pending until the broker
/// redelivers it.
#[async_trait]
pub trait Envelope: Send + Sync {
    /// Broker message id, or `"unknown"` when the publisher set none.
    fn id(&self) -> &str;

    /// 1 on first delivery, incremented by every retry.
    fn attempts(&self) -> u32;

    fn body(&self) -> &QueueMessage;

    /// Remove the message from the queue permanently.
    async fn ack(&self) -> Result<(), QueueError>;

    /// Return the message to the queue, visible again after the delay.
    async fn retry(&self, options: RetryOptions) -> Result<(), QueueError>;
}

/// Ordered batch of envelopes delivered from one named queue.
pub struct MessageBatch {
    pub queue: String,
    pub messages: Vec<Box<dyn Envelope>>,
}

impl MessageBatch {
    pub fn new(queue: impl Into<String>, messages: Vec<Box<dyn Envelope>>) -> Self {
        Self {
            queue: queue.into(),
            messages,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Broker-side settlement of a single delivery.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<(), QueueError>;

    /// Hand the delivery back to the broker for immediate redelivery.
    async fn requeue(&self) -> Result<(), QueueError>;

    /// Drop the delivery without redelivery.
    async fn reject(&self) -> Result<(), QueueError>;
}

#[async_trait]
impl DeliveryAcker for Acker {
    async fn ack(&self) -> Result<(), QueueError> {
        Acker::ack(self, BasicAckOptions::default())
            .await
            .map_err(QueueError::Ack)
    }

    async fn requeue(&self) -> Result<(), QueueError> {
        self.nack(BasicNackOptions {
            requeue: true,
            ..Default::default()
        })
        .await
        .map_err(QueueError::Nack)
    }

    async fn reject(&self) -> Result<(), QueueError> {
        Acker::reject(self, BasicRejectOptions { requeue: false })
            .await
            .map_err(QueueError::Nack)
    }
}

/// Re-enqueues the bytes of a delivery for a later attempt.
#[async_trait]
pub trait Redelivery: Send + Sync {
    async fn republish(
        &self,
        body: &[u8],
        message_id: &str,
        retry_count: u32,
        delay_seconds: u32,
    ) -> Result<(), QueueError>;
}

#[async_trait]
impl Redelivery for Publisher {
    async fn republish(
        &self,
        body: &[u8],
        message_id: &str,
        retry_count: u32,
        delay_seconds: u32,
    ) -> Result<(), QueueError> {
        self.publish_raw(body, message_id, retry_count, delay_seconds)
            .await
    }
}

/// The parts of a RabbitMQ delivery an envelope needs.
pub struct DeliveryParts {
    pub id: String,
    pub retry_count: u32,
    pub data: Vec<u8>,
    pub acker: Box<dyn DeliveryAcker>,
}

impl From<Delivery> for DeliveryParts {
    fn from(delivery: Delivery) -> Self {
        Self {
            id: message_id_of(&delivery),
            retry_count: retry_count_from(delivery.properties.headers().as_ref()),
            data: delivery.data,
            acker: Box::new(delivery.acker),
        }
    }
}

/// Envelope over a RabbitMQ delivery.
///
/// Retrying republishes the original bytes through the delay queue and then
/// acks the delivery. Should the republish fail, the delivery is requeued
/// only after the retry delay has passed, so a broker outage cannot turn
/// into back-to-back sends against the email API.
pub struct RabbitEnvelope {
    id: String,
    retry_count: u32,
    body: QueueMessage,
    data: Vec<u8>,
    acker: Box<dyn DeliveryAcker>,
    redelivery: Arc<dyn Redelivery>,
}

impl RabbitEnvelope {
    /// Decode the delivery body into an envelope.
    ///
    /// A body that is not a `QueueMessage` would fail on every attempt, so
    /// it is rejected without requeue and `None` is returned.
    pub async fn open(parts: DeliveryParts, redelivery: Arc<dyn Redelivery>) -> Option<Self> {
        match serde_json::from_slice::<QueueMessage>(&parts.data) {
            Ok(body) => Some(Self {
                id: parts.id,
                retry_count: parts.retry_count,
                body,
                data: parts.data,
                acker: parts.acker,
                redelivery,
            }),
            Err(e) => {
                error!(
                    message_id = %parts.id,
                    error = %e,
                    body_preview = %String::from_utf8_lossy(
                        &parts.data[..parts.data.len().min(500)]
                    ),
                    "rabbitmq_message_parse_failed"
                );

                if let Err(reject_err) = parts.acker.reject().await {
                    error!(message_id = %parts.id, error = %reject_err, "rabbitmq_reject_failed");
                }
                None
            }
        }
    }
}

#[async_trait]
impl Envelope for RabbitEnvelope {
    fn id(&self) -> &str {
        &self.id
    }

    fn attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    fn body(&self) -> &QueueMessage {
        &self.body
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.acker.ack().await
    }

    async fn retry(&self, options: RetryOptions) -> Result<(), QueueError> {
        let republished = self
            .redelivery
            .republish(
                &self.data,
                &self.id,
                self.retry_count.saturating_add(1),
                options.delay_seconds,
            )
            .await;

        match republished {
            Ok(()) => self.ack().await,
            Err(e) => {
                warn!(
                    message_id = %self.id,
                    error = %e,
                    delay_seconds = options.delay_seconds,
                    "rabbitmq_retry_publish_failed_requeueing"
                );
                // The requeued delivery comes straight back; hold it for the delay first
                tokio::time::sleep(Duration::from_secs(u64::from(options.delay_seconds))).await;
                self.acker.requeue().await?;
                Err(e)
            }
        }
    }
}

/// Message id from the delivery properties.
pub fn message_id_of(delivery: &Delivery) -> String {
    delivery
        .properties
        .message_id()
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Read the retry counter header, treating a missing or malformed value as 0.
pub fn retry_count_from(headers: Option<&FieldTable>) -> u32 {
    let value = headers.and_then(|h| {
        h.inner()
            .iter()
            .find(|(k, _)| k.as_str() == RETRY_COUNT_HEADER)
            .map(|(_, v)| v)
    });

    match value {
        Some(AMQPValue::LongUInt(n)) => *n,
        Some(AMQPValue::ShortUInt(n)) => u32::from(*n),
        Some(AMQPValue::ShortShortUInt(n)) => u32::from(*n),
        Some(AMQPValue::LongInt(n)) => u32::try_from(*n).unwrap_or(0),
        Some(AMQPValue::LongLongInt(n)) => u32::try_from(*n).unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::testing::{AckerCall, RecordingAcker, RecordingRedelivery};

    fn parts(data: &[u8], acker: &RecordingAcker) -> DeliveryParts {
        DeliveryParts {
            id: "m1".to_string(),
            retry_count: 2,
            data: data.to_vec(),
            acker: Box::new(acker.clone()),
        }
    }

    #[test]
    fn test_retry_count_missing_headers() {
        assert_eq!(retry_count_from(None), 0);
        assert_eq!(retry_count_from(Some(&FieldTable::default())), 0);
    }

    #[test]
    fn test_retry_count_present() {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongUInt(3));

        assert_eq!(retry_count_from(Some(&headers)), 3);
    }

    #[test]
    fn test_retry_count_other_integer_widths() {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongLongInt(7));

        assert_eq!(retry_count_from(Some(&headers)), 7);
    }

    #[test]
    fn test_retry_count_negative_or_wrong_type() {
        let mut negative = FieldTable::default();
        negative.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongInt(-1));
        assert_eq!(retry_count_from(Some(&negative)), 0);

        let mut text = FieldTable::default();
        text.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongString("2".into()));
        assert_eq!(retry_count_from(Some(&text)), 0);
    }

    #[tokio::test]
    async fn test_open_rejects_undecodable_body_without_requeue() {
        let acker = RecordingAcker::default();
        let redelivery = Arc::new(RecordingRedelivery::default());

        let envelope = RabbitEnvelope::open(parts(b"not json", &acker), redelivery).await;

        assert!(envelope.is_none());
        assert_eq!(acker.calls(), vec![AckerCall::Reject]);
    }

    #[tokio::test]
    async fn test_open_rejects_body_without_user_id() {
        let acker = RecordingAcker::default();
        let redelivery = Arc::new(RecordingRedelivery::default());

        let envelope =
            RabbitEnvelope::open(parts(br#"{"message":"hi"}"#, &acker), redelivery).await;

        assert!(envelope.is_none());
        assert_eq!(acker.calls(), vec![AckerCall::Reject]);
    }

    #[tokio::test]
    async fn test_open_decodes_valid_body_without_settling() {
        let acker = RecordingAcker::default();
        let redelivery = Arc::new(RecordingRedelivery::default());

        let envelope = RabbitEnvelope::open(
            parts(br#"{"userId":4,"message":"Hello Resend"}"#, &acker),
            redelivery,
        )
        .await
        .unwrap();

        assert_eq!(envelope.id(), "m1");
        assert_eq!(envelope.attempts(), 3);
        assert_eq!(envelope.body(), &QueueMessage::new(4).with_message("Hello Resend"));
        assert!(acker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_retry_republishes_then_acks() {
        let acker = RecordingAcker::default();
        let redelivery = Arc::new(RecordingRedelivery::default());
        let body = br#"{"userId":4}"#;

        let envelope = RabbitEnvelope::open(parts(body, &acker), redelivery.clone())
            .await
            .unwrap();
        envelope.retry(RetryOptions::delayed(5)).await.unwrap();

        assert_eq!(
            redelivery.published(),
            vec![(body.to_vec(), "m1".to_string(), 3, 5)]
        );
        assert_eq!(acker.calls(), vec![AckerCall::Ack]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_republish_waits_for_delay_before_requeue() {
        let acker = RecordingAcker::default();
        let redelivery = Arc::new(RecordingRedelivery::failing());

        let envelope = RabbitEnvelope::open(parts(br#"{"userId":4}"#, &acker), redelivery)
            .await
            .unwrap();

        let started = Instant::now();
        let result = envelope.retry(RetryOptions::delayed(5)).await;

        assert!(result.is_err());
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(acker.calls(), vec![AckerCall::Requeue]);
    }
}
