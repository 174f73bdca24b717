//! Worker Pool
//!
//! N long-running tokio tasks that lease deliveries from the task queue, run
//! them through the executor and acknowledge them. A delivery is acked only
//! after the executor returned `Ok`; any error leaves it leased so the queue
//! redelivers it once the lease expires.

use crate::executor::{StepExecutor, StepOutcome};
use domain_broker_ports::{Delivery, TaskQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct WorkerPool {
    executor: Arc<StepExecutor>,
    queue: Arc<dyn TaskQueue>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(
        executor: Arc<StepExecutor>,
        queue: Arc<dyn TaskQueue>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            executor,
            queue,
            config,
        }
    }

    /// Start the workers. They finish their current delivery and exit once
    /// `shutdown` flips to `true`.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!("Starting {} pipeline workers", self.config.concurrency);
        (0..self.config.concurrency.max(1))
            .map(|worker| {
                let executor = self.executor.clone();
                let queue = self.queue.clone();
                let poll_interval = self.config.poll_interval;
                let shutdown = shutdown.clone();
                tokio::spawn(
                    run_worker(executor, queue, poll_interval, shutdown)
                        .instrument(info_span!("worker", worker)),
                )
            })
            .collect()
    }

    /// Process deliveries on the calling task until the queue has nothing
    /// visible left. Returns how many deliveries were handled.
    pub async fn process_available(&self) -> usize {
        let mut handled = 0;
        loop {
            match self.queue.dequeue().await {
                Ok(Some(delivery)) => {
                    process_delivery(&self.executor, self.queue.as_ref(), delivery).await;
                    handled += 1;
                }
                Ok(None) => return handled,
                Err(e) => {
                    error!("Failed to dequeue task: {}", e);
                    return handled;
                }
            }
        }
    }
}

async fn run_worker(
    executor: Arc<StepExecutor>,
    queue: Arc<dyn TaskQueue>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Worker started");
    while !*shutdown.borrow() {
        let idle = match queue.dequeue().await {
            Ok(Some(delivery)) => {
                process_delivery(&executor, queue.as_ref(), delivery).await;
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!("Failed to dequeue task: {}", e);
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // sender gone: nobody can stop us any more
                        break;
                    }
                }
            }
        }
    }
    debug!("Worker stopped");
}

async fn process_delivery(executor: &StepExecutor, queue: &dyn TaskQueue, delivery: Delivery) {
    match executor.execute(delivery.task.clone()).await {
        Ok(outcome) => {
            debug!("Delivery {} handled: {:?}", delivery.id, outcome);
            if let Err(e) = queue.ack(&delivery).await {
                error!("Failed to acknowledge delivery {}: {}", delivery.id, e);
            }
            if outcome == StepOutcome::Failed {
                info!(
                    "Operation {} failed at step {}",
                    delivery.task.operation_id, delivery.task.step
                );
            }
        }
        Err(e) => {
            error!(
                "Step {} of operation {} could not be handled, leaving delivery {} for redelivery: {}",
                delivery.task.step, delivery.task.operation_id, delivery.id, e
            );
        }
    }
}
