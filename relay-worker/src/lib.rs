//! Resend relay - queue-buffered email sending.
//!
//! This library provides shared modules for the two relay binaries:
//! - `relay-web`: Producer endpoint that enqueues delayed email messages
//! - `relay-worker`: Consumer that sends queued emails and acks or retries them
//!
//! ## Architecture
//!
//! ```text
//! POST /api/email → Web Server → resend-demo queue (1s delay) → Worker → Resend API
//!                                        ▲                          │
//!                                        └────── retry (5s delay) ──┘
//! ```

pub mod config;
pub mod dispatch;
pub mod email;
pub mod queue;
pub mod signal;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{Dispatcher, QueueHandler, SendEmailHandler};
pub use email::{EmailSender, ResendClient};
pub use queue::{
    Envelope, MessageBatch, Publisher, QueueMessage, QueueSender, EMAIL_QUEUE,
    ENQUEUE_DELAY_SECONDS, RETRY_DELAY_SECONDS,
};
pub use web::AppState;
