//! Email API module.
//!
//! The dispatcher talks to the provider through `EmailSender`. A call either
//! reaches the provider, in which case the response says whether the email
//! was accepted, or fails in transport and returns `Err`.

use async_trait::async_trait;
use thiserror::Error;

pub mod resend;
pub mod types;

pub use resend::ResendClient;
pub use types::{ApiError, SendEmailRequest, SendEmailResponse, SentEmail};

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email API request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Sends a single email through a provider.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, request: &SendEmailRequest) -> Result<SendEmailResponse, EmailError>;
}
