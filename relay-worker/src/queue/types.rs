//! Queue message types.
//!
//! The wire format is camelCase JSON so producers written against the same
//! queue in other stacks can interoperate.

use serde::{Deserialize, Serialize};

/// Queue name for outbound emails.
pub const EMAIL_QUEUE: &str = "resend-demo";

/// Delay applied to every message the web endpoint enqueues.
pub const ENQUEUE_DELAY_SECONDS: u32 = 1;

/// Delay before a failed send becomes visible again.
pub const RETRY_DELAY_SECONDS: u32 = 5;

/// Header carrying how many times a message has been retried.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Payload buffered on the email queue.
///
/// Never modified after it is enqueued; consumers only signal on the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    /// User the email is about
    pub user_id: i64,
    /// Free text rendered into the email body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Recipient; a fallback address is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Caller-supplied timestamp, carried but not interpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl QueueMessage {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            message: None,
            email: None,
            time: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }
}

/// Options for submitting a message to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendOptions {
    /// Seconds before the message becomes visible to consumers
    pub delay_seconds: u32,
}

impl SendOptions {
    pub fn delayed(delay_seconds: u32) -> Self {
        Self { delay_seconds }
    }
}

/// Options for returning a delivered message to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryOptions {
    /// Seconds before the message is redelivered
    pub delay_seconds: u32,
}

impl RetryOptions {
    pub fn delayed(delay_seconds: u32) -> Self {
        Self { delay_seconds }
    }
}
