//! HTTP endpoint handlers.
//!
//! The email endpoint does one thing: enqueue a message with a short delay
//! and report whether the broker took it. Sending happens in the worker.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::queue::{QueueMessage, QueueSender, SendOptions, ENQUEUE_DELAY_SECONDS};
use crate::Config;

/// Body text of every message enqueued through `POST /api/email`.
pub const DEMO_MESSAGE: &str = "Hello Resend";

/// Upper bound on iterations of one stress-test request.
pub const MAX_STRESS_ITERATIONS: u32 = 1000;

const DEFAULT_STRESS_ITERATIONS: u32 = 30;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub queue: Arc<dyn QueueSender>,
}

impl AppState {
    pub fn new(config: Config, queue: Arc<dyn QueueSender>) -> Self {
        Self {
            config: Arc::new(config),
            queue,
        }
    }
}

// =============================================================================
// Index and Health Check
// =============================================================================

pub async fn index() -> &'static str {
    "Avoid Resend Rate Limits!"
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Email Endpoint
// =============================================================================

/// Body of `POST /api/email`. Other fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    pub user_id: i64,
}

/// Result of an enqueue, reported in the body.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ApiResponse {
    pub message: &'static str,
    pub status: u16,
}

/// Enqueue a fixed demonstration email for the given user.
///
/// Queue failures are logged and turned into a `status: 500` body; the
/// handler itself always responds.
pub async fn enqueue_email(
    State(state): State<AppState>,
    Json(request): Json<EmailRequest>,
) -> Json<ApiResponse> {
    let message = QueueMessage::new(request.user_id).with_message(DEMO_MESSAGE);

    match state
        .queue
        .send(&message, SendOptions::delayed(ENQUEUE_DELAY_SECONDS))
        .await
    {
        Ok(()) => {
            info!(user_id = request.user_id, "email_enqueued");
            Json(ApiResponse {
                message: "Message sent",
                status: 200,
            })
        }
        Err(e) => {
            error!(user_id = request.user_id, error = %e, "email_enqueue_failed");
            Json(ApiResponse {
                message: "Failed to send message to the queue",
                status: 500,
            })
        }
    }
}

// =============================================================================
// Stress Test
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct StressTestParams {
    pub iterations: Option<u32>,
}

/// Outcome of one stress-test enqueue.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum IterationResult {
    Sent {
        iteration: u32,
        duration: u64,
        time: String,
        email: &'static str,
    },
    Failed {
        iteration: u32,
        error: &'static str,
        email: &'static str,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StressTestReport {
    pub total_iterations: u32,
    pub successful_iterations: usize,
    /// Mean enqueue time in milliseconds over successful iterations
    pub average_duration: f64,
    pub results: Vec<IterationResult>,
}

/// Enqueue a burst of messages to exercise the rate-limit buffering.
///
/// Every third message goes to the provider's test inbox, the rest to
/// `delivered@example.com`.
pub async fn stress_test(
    State(state): State<AppState>,
    Query(params): Query<StressTestParams>,
) -> Json<StressTestReport> {
    let iterations = params
        .iterations
        .unwrap_or(DEFAULT_STRESS_ITERATIONS)
        .min(MAX_STRESS_ITERATIONS);

    info!(iterations = iterations, "stress_test_started");

    let mut results = Vec::with_capacity(iterations as usize);
    let mut total_duration = 0u64;
    let mut successful = 0usize;

    for i in 0..iterations {
        let email = if i % 3 == 0 {
            "delivered@resend.dev"
        } else {
            "delivered@example.com"
        };
        let time = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let message = QueueMessage::new(i64::from(i))
            .with_time(time.clone())
            .with_email(email);

        let started = Instant::now();
        match state
            .queue
            .send(&message, SendOptions::delayed(ENQUEUE_DELAY_SECONDS))
            .await
        {
            Ok(()) => {
                let duration = started.elapsed().as_millis() as u64;
                total_duration += duration;
                successful += 1;
                results.push(IterationResult::Sent {
                    iteration: i + 1,
                    duration,
                    time,
                    email,
                });
            }
            Err(e) => {
                error!(iteration = i + 1, error = %e, "stress_test_enqueue_failed");
                results.push(IterationResult::Failed {
                    iteration: i + 1,
                    error: "Failed to send message",
                    email,
                });
            }
        }
    }

    let average_duration = if successful == 0 {
        0.0
    } else {
        total_duration as f64 / successful as f64
    };

    info!(
        iterations = iterations,
        successful = successful,
        average_duration_ms = average_duration,
        "stress_test_complete"
    );

    Json(StressTestReport {
        total_iterations: iterations,
        successful_iterations: successful,
        average_duration,
        results,
    })
}
