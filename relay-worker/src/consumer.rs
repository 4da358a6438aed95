//! RabbitMQ consumer module using lapin.
//!
//! Deliveries are grouped into batches: a batch closes when it holds
//! `batch_size` messages or `batch_timeout_ms` after its first message
//! arrived, whichever comes first. Batches are dispatched one at a time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Connection, ConnectionProperties,
};
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use relay::queue::publisher::declare_work_queue;
use relay::queue::{Envelope, RabbitEnvelope, Redelivery};
use relay::signal::shutdown_signal;
use relay::{Config, Dispatcher, MessageBatch, Publisher};

/// Run the RabbitMQ consumer.
///
/// This function:
/// 1. Connects to RabbitMQ using the configured URL
/// 2. Sets prefetch to the batch size so a full batch can be in flight
/// 3. Declares the work queue (idempotent operation)
/// 4. Collects deliveries into batches and dispatches them
/// 5. Handles graceful shutdown on SIGINT/SIGTERM
pub async fn run(config: Config, publisher: Publisher, dispatcher: Dispatcher) -> Result<()> {
    let queue = config.email_queue.clone();

    info!(url_length = config.cloudamqp_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(&config.cloudamqp_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    let channel = conn.create_channel().await.context("Failed to create channel")?;

    info!("rabbitmq_channel_created");

    let prefetch_count = u16::try_from(config.batch_size).unwrap_or(u16::MAX);
    channel
        .basic_qos(prefetch_count, BasicQosOptions::default())
        .await
        .context("Failed to set QoS")?;

    info!(prefetch_count = prefetch_count, "rabbitmq_qos_set");

    declare_work_queue(&channel, &queue)
        .await
        .context("Failed to declare queue")?;

    info!(queue = %queue, "rabbitmq_queue_declared");

    let mut consumer = channel
        .basic_consume(
            &queue,
            "relay-worker",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consumer")?;

    info!(queue = %queue, handlers = ?dispatcher.queues(), "rabbitmq_consumer_started");
    info!("worker_ready");

    let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        // Wait for the first message of the next batch
        let first = tokio::select! {
            _ = &mut shutdown => {
                info!("worker_stopping");
                break;
            }
            delivery = consumer.next() => delivery,
        };

        let first = match first {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                error!(error = %e, "rabbitmq_delivery_error");
                continue;
            }
            None => {
                warn!("rabbitmq_consumer_closed");
                break;
            }
        };

        // Fill the rest of the batch. Shutdown is honoured once it is dispatched.
        let mut deliveries = vec![first];
        let deadline = Instant::now() + batch_timeout;
        let mut closed = false;

        while deliveries.len() < config.batch_size {
            match timeout_at(deadline, consumer.next()).await {
                Ok(Some(Ok(delivery))) => deliveries.push(delivery),
                Ok(Some(Err(e))) => error!(error = %e, "rabbitmq_delivery_error"),
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        let batch = into_batch(&queue, deliveries, &publisher).await;

        if !batch.is_empty() {
            dispatcher.dispatch(batch).await;
        }

        if closed {
            warn!("rabbitmq_consumer_closed");
            break;
        }
    }

    publisher.close().await;

    if let Err(e) = channel.close(200, "Normal shutdown").await {
        warn!(error = %e, "rabbitmq_channel_close_error");
    }
    if let Err(e) = conn.close(200, "Normal shutdown").await {
        warn!(error = %e, "rabbitmq_connection_close_error");
    }

    info!("worker_shutdown_complete");
    Ok(())
}

/// Wrap deliveries in envelopes, dropping any whose body was rejected.
async fn into_batch(queue: &str, deliveries: Vec<Delivery>, publisher: &Publisher) -> MessageBatch {
    let redelivery: Arc<dyn Redelivery> = Arc::new(publisher.clone());
    let mut messages: Vec<Box<dyn Envelope>> = Vec::with_capacity(deliveries.len());

    for delivery in deliveries {
        if let Some(envelope) = RabbitEnvelope::open(delivery.into(), redelivery.clone()).await {
            info!(
                queue = %queue,
                message_id = %envelope.id(),
                attempts = envelope.attempts(),
                "rabbitmq_message_received"
            );
            messages.push(Box::new(envelope));
        }
    }

    MessageBatch::new(queue, messages)
}
