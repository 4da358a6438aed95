//! Relay Web Server - producer endpoint.
//!
//! This binary provides a thin web server that:
//! - Accepts `POST /api/email` requests
//! - Enqueues a message on RabbitMQ with a one second delay
//! - Responds without waiting for the email to be sent
//!
//! Sending happens in the `relay-worker` binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay::signal::shutdown_signal;
use relay::web::router;
use relay::{AppState, Config, Publisher};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    let config = Config::from_env();
    info!(
        port = config.port,
        queue = %config.email_queue,
        stress_test_enabled = config.enable_stress_test,
        "config_loaded"
    );

    // Connects lazily on the first enqueue
    let publisher = Publisher::new(config.cloudamqp_url.clone(), config.email_queue.clone());
    info!("rabbitmq_publisher_created");

    let state = AppState::new(config.clone(), Arc::new(publisher.clone()));
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("web_server_shutting_down");
        })
        .await
        .context("Server error")?;

    publisher.close().await;

    info!("web_server_shutdown_complete");

    Ok(())
}
