//! Web server module for the producer endpoint.
//!
//! This module provides a thin web server that:
//! - Accepts `POST /api/email` and enqueues a delayed message
//! - Answers immediately, before any email is sent
//! - Optionally exposes a stress-test endpoint for load experiments

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub mod handlers;

pub use handlers::{
    enqueue_email, health, index, stress_test, ApiResponse, AppState, EmailRequest,
    HealthResponse, IterationResult, StressTestParams, StressTestReport,
};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/email", post(enqueue_email));

    if state.config.enable_stress_test {
        app = app.route("/api/stress-test-limits", get(stress_test));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}
