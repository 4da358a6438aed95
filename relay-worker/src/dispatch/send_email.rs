//! Handler for the email queue: one provider call per message.
//!
//! Per message the outcome is either an ack (the provider accepted the email)
//! or a retry after `RETRY_DELAY_SECONDS` (the provider refused it or could
//! not be reached). There is no local attempt limit; a dead-letter policy, if
//! any, belongs to the broker.
//!
//! Delivery is at-least-once. If the provider accepted an email but the call
//! still looked failed from here, the retry sends it a second time.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::email::{EmailSender, SendEmailRequest, SendEmailResponse};
use crate::queue::{Envelope, MessageBatch, QueueMessage, RetryOptions, RETRY_DELAY_SECONDS};

use super::QueueHandler;

/// Sender address of every email.
pub const FROM_ADDRESS: &str = "onboarding@resend.dev";

/// Recipient used when a message carries no email address.
pub const FALLBACK_RECIPIENT: &str = "delivered@resend.dev";

pub const SUBJECT: &str = "Hello World";

pub struct SendEmailHandler {
    email: Arc<dyn EmailSender>,
}

impl SendEmailHandler {
    pub fn new(email: Arc<dyn EmailSender>) -> Self {
        Self { email }
    }

    /// Send one message and signal its envelope. Returns whether it was acked.
    async fn process(&self, envelope: &dyn Envelope) -> bool {
        let body = envelope.body();
        let request = build_email(body);

        info!(
            message_id = %envelope.id(),
            user_id = body.user_id,
            to = %request.to.join(","),
            attempts = envelope.attempts(),
            "send_email_started"
        );

        let sent = match self.email.send(&request).await {
            Ok(SendEmailResponse { error: None, data }) => {
                info!(
                    message_id = %envelope.id(),
                    email_id = data.as_ref().map(|d| d.id.as_str()).unwrap_or(""),
                    "send_email_succeeded"
                );
                true
            }
            Ok(SendEmailResponse {
                error: Some(api_error),
                ..
            }) => {
                error!(
                    message_id = %envelope.id(),
                    error_name = %api_error.name,
                    error_message = %api_error.message,
                    status_code = ?api_error.status_code,
                    "send_email_api_error"
                );
                false
            }
            Err(e) => {
                error!(
                    message_id = %envelope.id(),
                    error = %e,
                    "send_email_transport_error"
                );
                false
            }
        };

        if sent {
            if let Err(e) = envelope.ack().await {
                error!(message_id = %envelope.id(), error = %e, "send_email_ack_failed");
            }
            return true;
        }

        match envelope.retry(RetryOptions::delayed(RETRY_DELAY_SECONDS)).await {
            Ok(()) => info!(
                message_id = %envelope.id(),
                delay_seconds = RETRY_DELAY_SECONDS,
                "send_email_retry_scheduled"
            ),
            Err(e) => error!(message_id = %envelope.id(), error = %e, "send_email_retry_failed"),
        }
        false
    }
}

#[async_trait]
impl QueueHandler for SendEmailHandler {
    async fn handle(&self, batch: MessageBatch) {
        info!(queue = %batch.queue, batch_size = batch.len(), "send_email_batch_started");

        let mut acked = 0;
        for envelope in &batch.messages {
            if self.process(envelope.as_ref()).await {
                acked += 1;
            }
        }

        info!(
            queue = %batch.queue,
            acked = acked,
            retried = batch.len() - acked,
            "send_email_batch_complete"
        );
    }
}

/// Build the email for a queued message.
pub fn build_email(body: &QueueMessage) -> SendEmailRequest {
    let recipient = body
        .email
        .as_deref()
        .filter(|e| !e.is_empty())
        .unwrap_or(FALLBACK_RECIPIENT);

    SendEmailRequest {
        from: FROM_ADDRESS.to_string(),
        to: vec![recipient.to_string()],
        subject: SUBJECT.to_string(),
        html: format!(
            "<p>Hi {}, {}</p>",
            body.user_id,
            body.message.as_deref().unwrap_or("")
        ),
    }
}
