//! Step Executor
//!
//! Runs one delivered `StepTask`: validates it against the operation's chain,
//! dispatches the step, and decides what happens next (advance, reschedule,
//! fail or drop). The executor never acknowledges deliveries itself; an `Err`
//! tells the caller to leave the delivery un-acked so the queue hands it out
//! again.

use crate::error::{Result, StepError};
use crate::settings::RetryPolicy;
use crate::steps::{StepRunner, StepScope};
use domain_broker_core::{
    DomainError, OperationId, PipelineBuilder, RetryClass, StepDescriptor, StepId, StepTask,
};
use domain_broker_ports::{EntityStore, TaskQueue};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

/// What the executor did with a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step done; `next` was enqueued (or the chain is finished)
    Advanced { next: Option<StepId> },
    /// Transient failure; the same step comes back after the retry delay
    Rescheduled { attempt: u32 },
    /// The operation was marked failed
    Failed,
    /// The operation is already terminal; nothing to do
    Dropped,
    /// The operation was canceled; the chain stops here
    Halted,
}

pub struct StepExecutor {
    store: Arc<dyn EntityStore>,
    queue: Arc<dyn TaskQueue>,
    runner: StepRunner,
    retry: RetryPolicy,
}

impl StepExecutor {
    pub fn new(
        store: Arc<dyn EntityStore>,
        queue: Arc<dyn TaskQueue>,
        runner: StepRunner,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            runner,
            retry,
        }
    }

    pub async fn execute(&self, task: StepTask) -> Result<StepOutcome> {
        let span = info_span!(
            "pipeline_step",
            operation_id = %task.operation_id,
            correlation_id = %task.correlation_id,
            step = %task.step,
            attempt = task.attempt,
        );
        self.execute_task(task).instrument(span).await
    }

    async fn execute_task(&self, task: StepTask) -> Result<StepOutcome> {
        let Some(operation) = self.store.get_operation(task.operation_id).await? else {
            // nothing to mark failed; acking drops the orphan task
            error!("Operation {} not found, dropping task", task.operation_id);
            return Ok(StepOutcome::Failed);
        };

        if operation.is_terminal() {
            info!(
                "Operation {} already {}, dropping task",
                operation.id, operation.state
            );
            return Ok(StepOutcome::Dropped);
        }
        if operation.is_canceled() {
            info!("Operation {} was canceled, halting chain", operation.id);
            return Ok(StepOutcome::Halted);
        }

        let Some(instance) = self.store.get_instance(&operation.instance_id).await? else {
            error!(
                "Instance {} of operation {} not found",
                operation.instance_id, operation.id
            );
            return self.fail_operation(operation.id).await;
        };

        let pipeline = PipelineBuilder::chain(instance.resource_kind(), operation.action);
        let descriptor = match pipeline.get(task.position) {
            Some(descriptor) if descriptor.id == task.step => *descriptor,
            other => {
                error!(
                    "Task step {} does not match position {} of the {} chain (found {:?})",
                    task.step,
                    task.position,
                    operation.action,
                    other.map(|descriptor| descriptor.id)
                );
                return self.fail_operation(operation.id).await;
            }
        };

        let mut scope = StepScope::new(operation, instance);
        let result = self.runner.run(task.step, &mut scope).await;
        let next = pipeline.next_task(&task);

        match result {
            Ok(()) => self.advance(&next).await,
            Err(err) => {
                self.handle_failure(&task, descriptor, scope.operation.id, err, &next)
                    .await
            }
        }
    }

    async fn advance(&self, next: &Option<StepTask>) -> Result<StepOutcome> {
        match next {
            Some(next) => {
                self.queue.enqueue(next.clone()).await?;
                Ok(StepOutcome::Advanced {
                    next: Some(next.step),
                })
            }
            None => {
                info!("Pipeline finished");
                Ok(StepOutcome::Advanced { next: None })
            }
        }
    }

    async fn handle_failure(
        &self,
        task: &StepTask,
        descriptor: StepDescriptor,
        operation_id: OperationId,
        err: StepError,
        next: &Option<StepTask>,
    ) -> Result<StepOutcome> {
        match (descriptor.retry, err) {
            (RetryClass::BestEffort, err) => {
                warn!("Best-effort step failed, continuing: {}", err);
                self.advance(next).await
            }
            (RetryClass::Retriable, StepError::Transient(message))
                if task.attempt < self.retry.max_attempts =>
            {
                let retry = task.retry();
                warn!(
                    "Step failed (attempt {}/{}), retrying in {:?}: {}",
                    task.attempt, self.retry.max_attempts, self.retry.retry_delay, message
                );
                self.queue.schedule(retry.clone(), self.retry.retry_delay).await?;
                Ok(StepOutcome::Rescheduled {
                    attempt: retry.attempt,
                })
            }
            (RetryClass::Retriable, StepError::Transient(message)) => {
                error!(
                    "Step failed after {} attempts, giving up: {}",
                    task.attempt, message
                );
                self.fail_operation(operation_id).await
            }
            (RetryClass::Retriable, StepError::Fatal(message)) => {
                error!("Step failed fatally: {}", message);
                self.fail_operation(operation_id).await
            }
        }
    }

    /// Mark the operation failed, re-reading it so concurrent updates made by
    /// the step are kept.
    async fn fail_operation(&self, operation_id: OperationId) -> Result<StepOutcome> {
        let Some(mut operation) = self.store.get_operation(operation_id).await? else {
            return Ok(StepOutcome::Failed);
        };
        match operation.fail() {
            Ok(()) => {
                self.store.save_operation(&operation).await?;
                Ok(StepOutcome::Failed)
            }
            Err(DomainError::InvalidStateTransition { from, .. }) => {
                warn!("Operation {} already {}, not marking failed", operation_id, from);
                Ok(StepOutcome::Dropped)
            }
            Err(err) => Err(err.into()),
        }
    }
}
