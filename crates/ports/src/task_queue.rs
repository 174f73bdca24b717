//! Task Queue Port
//!
//! Durable at-least-once transport for step tasks. A delivery that is not
//! acknowledged is handed out again; there is no ordering across operations.

use async_trait::async_trait;
use domain_broker_core::StepTask;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryId(pub Uuid);

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task leased to one consumer until it is acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: DeliveryId,
    pub task: StepTask,
}

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("Queue is not open")]
    Closed,

    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Acquire connections; must be called before any other method
    async fn open(&self) -> QueueResult<()>;

    /// Release connections; later calls fail with `QueueError::Closed`
    async fn close(&self) -> QueueResult<()>;

    async fn enqueue(&self, task: StepTask) -> QueueResult<()>;

    /// Make `task` visible only after `delay`
    async fn schedule(&self, task: StepTask, delay: Duration) -> QueueResult<()>;

    /// Lease the next visible task, if any
    async fn dequeue(&self) -> QueueResult<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;
}
