//! Batch dispatch keyed on queue name.
//!
//! Each queue the worker consumes gets a `QueueHandler`. Adding a queue means
//! registering another handler; the dispatcher itself does not change.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::queue::MessageBatch;

pub mod send_email;

pub use send_email::SendEmailHandler;

/// Processes every message of a batch from one queue.
///
/// Implementations are responsible for acking or retrying each envelope.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, batch: MessageBatch);
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("handler already registered for queue {0}")]
    DuplicateHandler(String),
}

/// Routes batches to the handler registered for their queue.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn QueueHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        queue: impl Into<String>,
        handler: Arc<dyn QueueHandler>,
    ) -> Result<(), DispatchError> {
        let queue = queue.into();
        if self.handlers.contains_key(&queue) {
            return Err(DispatchError::DuplicateHandler(queue));
        }
        self.handlers.insert(queue, handler);
        Ok(())
    }

    /// Queue names with a registered handler.
    pub fn queues(&self) -> Vec<&str> {
        let mut queues: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        queues.sort_unstable();
        queues
    }

    /// Hand the batch to its queue's handler.
    ///
    /// A batch from an unknown queue is logged and left untouched: nothing is
    /// acked or retried, so the broker's own redelivery policy applies.
    /// Returns whether a handler ran.
    pub async fn dispatch(&self, batch: MessageBatch) -> bool {
        match self.handlers.get(&batch.queue) {
            Some(handler) => {
                info!(queue = %batch.queue, batch_size = batch.len(), "dispatch_batch");
                handler.handle(batch).await;
                true
            }
            None => {
                error!(
                    queue = %batch.queue,
                    batch_size = batch.len(),
                    "unknown_queue"
                );
                false
            }
        }
    }
}
