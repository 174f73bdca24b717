//! In-memory task queue
//!
//! At-least-once like the durable queue: a leased delivery that is not
//! acknowledged within the visibility timeout becomes visible again.

use async_trait::async_trait;
use domain_broker_core::StepTask;
use domain_broker_ports::{Delivery, DeliveryId, QueueError, QueueResult, TaskQueue};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

struct QueuedTask {
    id: DeliveryId,
    task: StepTask,
    visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
    open: bool,
    ready: VecDeque<QueuedTask>,
    leased: HashMap<DeliveryId, (StepTask, Instant)>,
}

impl QueueState {
    fn ensure_open(&self) -> QueueResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(QueueError::Closed)
        }
    }

    fn reclaim_expired_leases(&mut self, now: Instant) {
        let expired: Vec<DeliveryId> = self
            .leased
            .iter()
            .filter(|(_, (_, lease_expires))| *lease_expires <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((task, _)) = self.leased.remove(&id) {
                debug!(delivery_id = %id, "Lease expired, task visible again");
                self.ready.push_back(QueuedTask {
                    id,
                    task,
                    visible_at: now,
                });
            }
        }
    }
}

/// In-memory implementation of [`TaskQueue`]
#[derive(Clone)]
pub struct InMemoryTaskQueue {
    state: Arc<Mutex<QueueState>>,
    visibility_timeout: Duration,
}

impl InMemoryTaskQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            visibility_timeout,
        }
    }

    /// Tasks waiting to be delivered, scheduled ones included.
    pub async fn pending_tasks(&self) -> Vec<StepTask> {
        self.state
            .lock()
            .await
            .ready
            .iter()
            .map(|queued| queued.task.clone())
            .collect()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.leased.len()
    }

    /// Make every scheduled task visible now instead of after its delay.
    pub async fn release_scheduled(&self) {
        let now = Instant::now();
        for queued in self.state.lock().await.ready.iter_mut() {
            queued.visible_at = queued.visible_at.min(now);
        }
    }

    async fn push(&self, task: StepTask, delay: Duration) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        let id = DeliveryId(Uuid::new_v4());
        debug!(
            delivery_id = %id,
            operation_id = %task.operation_id,
            step = %task.step,
            delay_secs = delay.as_secs(),
            "Queued step task"
        );
        state.ready.push_back(QueuedTask {
            id,
            task,
            visible_at: Instant::now() + delay,
        });
        Ok(())
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn open(&self) -> QueueResult<()> {
        self.state.lock().await.open = true;
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        self.state.lock().await.open = false;
        Ok(())
    }

    async fn enqueue(&self, task: StepTask) -> QueueResult<()> {
        self.push(task, Duration::ZERO).await
    }

    async fn schedule(&self, task: StepTask, delay: Duration) -> QueueResult<()> {
        self.push(task, delay).await
    }

    async fn dequeue(&self) -> QueueResult<Option<Delivery>> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        let now = Instant::now();
        state.reclaim_expired_leases(now);

        let Some(index) = state.ready.iter().position(|queued| queued.visible_at <= now) else {
            return Ok(None);
        };
        let Some(queued) = state.ready.remove(index) else {
            return Ok(None);
        };
        state
            .leased
            .insert(queued.id, (queued.task.clone(), now + self.visibility_timeout));
        Ok(Some(Delivery {
            id: queued.id,
            task: queued.task,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        state.leased.remove(&delivery.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_broker_core::{CorrelationId, OperationId, StepId};

    fn task(step: StepId) -> StepTask {
        StepTask::new(OperationId(1), CorrelationId::new(), step, 0)
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_calls() {
        let queue = InMemoryTaskQueue::default();
        assert!(matches!(
            queue.enqueue(task(StepId::GeneratePrivateKey)).await,
            Err(QueueError::Closed)
        ));

        queue.open().await.unwrap();
        queue.enqueue(task(StepId::GeneratePrivateKey)).await.unwrap();
        queue.close().await.unwrap();
        assert!(matches!(queue.dequeue().await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_scheduled_task_is_invisible_until_released() {
        let queue = InMemoryTaskQueue::default();
        queue.open().await.unwrap();
        queue
            .schedule(task(StepId::AnswerChallenges), Duration::from_secs(600))
            .await
            .unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.pending_tasks().await.len(), 1);

        queue.release_scheduled().await;
        let delivery = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(delivery.task.step, StepId::AnswerChallenges);
    }

    #[tokio::test]
    async fn test_unacked_delivery_is_redelivered_after_timeout() {
        let queue = InMemoryTaskQueue::new(Duration::ZERO);
        queue.open().await.unwrap();
        queue.enqueue(task(StepId::MarkProvisioned)).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        let second = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.id, second.id);

        queue.ack(&second).await.unwrap();
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.in_flight().await, 0);
    }
}
