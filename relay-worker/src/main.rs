//! Relay Worker - RabbitMQ consumer that sends queued emails.
//!
//! This worker takes batches of messages from the email queue, sends each
//! through the Resend API, and acks it on success or schedules a delayed
//! retry on failure.

mod consumer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay::{Config, Dispatcher, Publisher, ResendClient, SendEmailHandler};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    tracing::info!(
        cloudamqp_url_set = !config.cloudamqp_url.is_empty(),
        queue = %config.email_queue,
        resend_api_key_set = config.resend_api_key.is_some(),
        resend_api_url = %config.resend_api_url,
        batch_size = config.batch_size,
        batch_timeout_ms = config.batch_timeout_ms,
        "config_loaded"
    );

    let api_key = config
        .resend_api_key
        .clone()
        .context("RESEND_API_KEY must be set")?;

    let email = ResendClient::new(
        &config.resend_api_url,
        api_key,
        Duration::from_millis(config.request_timeout_ms),
    )
    .context("Failed to create HTTP client")?;

    // Retries are republished through this publisher's delay queues
    let publisher = Publisher::new(config.cloudamqp_url.clone(), config.email_queue.clone());

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        config.email_queue.clone(),
        Arc::new(SendEmailHandler::new(Arc::new(email))),
    )?;

    consumer::run(config, publisher, dispatcher).await?;

    Ok(())
}
