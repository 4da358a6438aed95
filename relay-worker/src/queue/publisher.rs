//! Async RabbitMQ publisher for enqueueing messages.
//!
//! RabbitMQ has no per-message visibility delay, so delayed sends go through
//! a holding queue per delay length. Each holding queue has a fixed message
//! TTL and dead-letters expired messages into the work queue.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::error::QueueError;
use super::types::{QueueMessage, SendOptions, RETRY_COUNT_HEADER};
use super::QueueSender;

/// Async RabbitMQ publisher with connection management.
///
/// The publisher maintains a persistent connection and channel to RabbitMQ,
/// automatically reconnecting on failure. Cloning is cheap and clones share
/// the connection.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    url: String,
    queue: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
    /// Delays whose holding queue was declared on the current channel
    delay_queues: Mutex<HashSet<u32>>,
}

impl Publisher {
    /// Create a new publisher for `queue` on the given RabbitMQ URL.
    pub fn new(url: String, queue: String) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                url,
                queue,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
                delay_queues: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Name of the work queue this publisher feeds.
    pub fn queue(&self) -> &str {
        &self.inner.queue
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel, QueueError> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .map_err(QueueError::Connect)?;

        info!("rabbitmq_publisher_connected");

        let ch = conn.create_channel().await.map_err(QueueError::Channel)?;

        ch.confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(QueueError::Channel)?;

        declare_work_queue(&ch, &self.inner.queue).await?;

        info!(queue = %self.inner.queue, "rabbitmq_queue_declared");

        // Holding queues must be declared again on the new channel
        self.inner.delay_queues.lock().await.clear();

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Resolve the queue a message with the given delay is published to,
    /// declaring its holding queue on first use.
    async fn route(&self, channel: &Channel, delay_seconds: u32) -> Result<String, QueueError> {
        if delay_seconds == 0 {
            return Ok(self.inner.queue.clone());
        }

        let name = delay_queue_name(&self.inner.queue, delay_seconds);

        let mut declared = self.inner.delay_queues.lock().await;
        if declared.contains(&delay_seconds) {
            return Ok(name);
        }

        let mut args = FieldTable::default();
        args.insert(
            "x-message-ttl".into(),
            AMQPValue::LongUInt(delay_seconds.saturating_mul(1000)),
        );
        args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString("".into()));
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(self.inner.queue.as_str().into()),
        );

        channel
            .queue_declare(
                &name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|source| QueueError::Declare {
                queue: name.clone(),
                source,
            })?;

        info!(
            queue = %name,
            delay_seconds = delay_seconds,
            target_queue = %self.inner.queue,
            "rabbitmq_delay_queue_declared"
        );

        declared.insert(delay_seconds);
        Ok(name)
    }

    /// Publish an already-serialized message body.
    ///
    /// Used directly by retries so the redelivered bytes are exactly the
    /// bytes originally enqueued.
    pub async fn publish_raw(
        &self,
        body: &[u8],
        message_id: &str,
        retry_count: u32,
        delay_seconds: u32,
    ) -> Result<(), QueueError> {
        let channel = self.ensure_connected().await?;
        let routing_key = self.route(&channel, delay_seconds).await?;

        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongUInt(retry_count));

        let confirmation = channel
            .basic_publish(
                "",
                &routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(message_id.into())
                    .with_headers(headers),
            )
            .await
            .map_err(|source| QueueError::Publish {
                queue: routing_key.clone(),
                source,
            })?
            .await
            .map_err(|source| QueueError::Publish {
                queue: routing_key.clone(),
                source,
            })?;

        if confirmation.is_nack() {
            return Err(QueueError::Rejected(routing_key));
        }

        info!(
            queue = %routing_key,
            message_id = %message_id,
            delay_seconds = delay_seconds,
            retry_count = retry_count,
            body_length = body.len(),
            "rabbitmq_message_published"
        );

        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }

    fn next_message_id(&self) -> String {
        format!("{}-{:016x}", self.inner.queue, rand::random::<u64>())
    }
}

#[async_trait]
impl QueueSender for Publisher {
    async fn send(&self, message: &QueueMessage, options: SendOptions) -> Result<(), QueueError> {
        let body = serde_json::to_vec(message)?;
        let message_id = self.next_message_id();

        self.publish_raw(&body, &message_id, 0, options.delay_seconds)
            .await
    }
}

/// Declare the durable work queue consumers read from.
pub async fn declare_work_queue(channel: &Channel, queue: &str) -> Result<(), QueueError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|source| QueueError::Declare {
            queue: queue.to_string(),
            source,
        })?;

    Ok(())
}

/// Name of the holding queue for messages delayed by `delay_seconds`.
pub fn delay_queue_name(queue: &str, delay_seconds: u32) -> String {
    format!("{}.delay.{}s", queue, delay_seconds)
}
