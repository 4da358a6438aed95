//! In-memory fakes for the queue and email seams.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::email::{ApiError, EmailError, EmailSender, SendEmailRequest, SendEmailResponse};
use crate::queue::{
    DeliveryAcker, Envelope, QueueError, QueueMessage, QueueSender, Redelivery, RetryOptions,
    SendOptions,
};

/// A control signal an envelope received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Ack(String),
    Retry(String, u32),
}

/// Signals from every envelope of a batch, in call order.
#[derive(Clone, Default)]
pub struct SignalLog(Arc<Mutex<Vec<Signal>>>);

impl SignalLog {
    fn push(&self, signal: Signal) {
        self.0.lock().unwrap().push(signal);
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.0.lock().unwrap().clone()
    }
}

pub struct RecordingEnvelope {
    id: String,
    body: QueueMessage,
    log: SignalLog,
    fail_signals: bool,
}

impl RecordingEnvelope {
    pub fn new(id: &str, body: QueueMessage, log: &SignalLog) -> Self {
        Self {
            id: id.to_string(),
            body,
            log: log.clone(),
            fail_signals: false,
        }
    }

    pub fn boxed(id: &str, body: QueueMessage, log: &SignalLog) -> Box<dyn Envelope> {
        Self::new(id, body, log).into_boxed()
    }

    pub fn into_boxed(self) -> Box<dyn Envelope> {
        Box::new(self)
    }

    /// Record signals but report them as failed.
    pub fn failing(mut self) -> Self {
        self.fail_signals = true;
        self
    }

    fn outcome(&self) -> Result<(), QueueError> {
        if self.fail_signals {
            Err(QueueError::Rejected(self.id.clone()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Envelope for RecordingEnvelope {
    fn id(&self) -> &str {
        &self.id
    }

    fn attempts(&self) -> u32 {
        1
    }

    fn body(&self) -> &QueueMessage {
        &self.body
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.log.push(Signal::Ack(self.id.clone()));
        self.outcome()
    }

    async fn retry(&self, options: RetryOptions) -> Result<(), QueueError> {
        self.log
            .push(Signal::Retry(self.id.clone(), options.delay_seconds));
        self.outcome()
    }
}

/// Settlement call a broker delivery received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckerCall {
    Ack,
    Requeue,
    Reject,
}

#[derive(Clone, Default)]
pub struct RecordingAcker(Arc<Mutex<Vec<AckerCall>>>);

impl RecordingAcker {
    pub fn calls(&self) -> Vec<AckerCall> {
        self.0.lock().unwrap().clone()
    }

    fn record(&self, call: AckerCall) -> Result<(), QueueError> {
        self.0.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl DeliveryAcker for RecordingAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.record(AckerCall::Ack)
    }

    async fn requeue(&self) -> Result<(), QueueError> {
        self.record(AckerCall::Requeue)
    }

    async fn reject(&self) -> Result<(), QueueError> {
        self.record(AckerCall::Reject)
    }
}

/// Republished bytes, message id, retry count and delay.
pub type Republished = (Vec<u8>, String, u32, u32);

/// Redelivery that records republishes, or refuses all of them.
#[derive(Default)]
pub struct RecordingRedelivery {
    published: Mutex<Vec<Republished>>,
    fail: bool,
}

impl RecordingRedelivery {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<Republished> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Redelivery for RecordingRedelivery {
    async fn republish(
        &self,
        body: &[u8],
        message_id: &str,
        retry_count: u32,
        delay_seconds: u32,
    ) -> Result<(), QueueError> {
        if self.fail {
            return Err(QueueError::Rejected("resend-demo.delay.5s".to_string()));
        }
        self.published.lock().unwrap().push((
            body.to_vec(),
            message_id.to_string(),
            retry_count,
            delay_seconds,
        ));
        Ok(())
    }
}

/// Queue that records submissions, optionally refusing some user ids.
#[derive(Default)]
pub struct RecordingQueue {
    sent: Mutex<Vec<(QueueMessage, SendOptions)>>,
    fail_all: bool,
    fail_users: HashSet<i64>,
}

impl RecordingQueue {
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Default::default()
        }
    }

    pub fn failing_for(users: &[i64]) -> Self {
        Self {
            fail_users: users.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(QueueMessage, SendOptions)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueSender for RecordingQueue {
    async fn send(&self, message: &QueueMessage, options: SendOptions) -> Result<(), QueueError> {
        if self.fail_all || self.fail_users.contains(&message.user_id) {
            return Err(QueueError::Rejected("resend-demo".to_string()));
        }
        self.sent.lock().unwrap().push((message.clone(), options));
        Ok(())
    }
}

/// What the scripted email API does for one call.
pub enum Scripted {
    Sent,
    Refused(&'static str),
    Transport,
}

/// Email API answering from a script; calls past the end succeed.
#[derive(Default)]
pub struct ScriptedEmail {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<SendEmailRequest>>,
}

impl ScriptedEmail {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SendEmailRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for ScriptedEmail {
    async fn send(&self, request: &SendEmailRequest) -> Result<SendEmailResponse, EmailError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Scripted::Sent);

        match next {
            Scripted::Sent => Ok(SendEmailResponse::sent("email-id")),
            Scripted::Refused(message) => Ok(SendEmailResponse::failed(ApiError {
                message: message.to_string(),
                name: "validation_error".to_string(),
                status_code: Some(422),
            })),
            Scripted::Transport => Err(EmailError::Transport(transport_error())),
        }
    }
}

/// A real `reqwest::Error`, produced without touching the network.
fn transport_error() -> reqwest::Error {
    reqwest::Client::new()
        .get("not a url")
        .build()
        .unwrap_err()
}
