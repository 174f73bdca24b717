//! PostgreSQL Task Queue
//!
//! Durable at-least-once queue on a single table. Consumers lease rows with
//! `FOR UPDATE SKIP LOCKED`; a lease that is not acknowledged before
//! `leased_until` makes the row visible again.

use async_trait::async_trait;
use domain_broker_core::StepTask;
use domain_broker_ports::{Delivery, DeliveryId, QueueError, QueueResult, TaskQueue};
use sqlx::{PgPool, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// PostgreSQL implementation of [`TaskQueue`]
#[derive(Debug)]
pub struct PostgresTaskQueue {
    pool: PgPool,
    visibility_timeout: Duration,
    open: AtomicBool,
}

impl PostgresTaskQueue {
    pub fn new(pool: PgPool, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
            open: AtomicBool::new(false),
        }
    }

    /// Initialize the queue table
    pub async fn init_schema(&self) -> QueueResult<()> {
        info!("Initializing task queue schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS step_tasks (
                id UUID PRIMARY KEY,
                operation_id BIGINT NOT NULL,
                payload JSONB NOT NULL,
                visible_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                leased_until TIMESTAMPTZ NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(format!("Failed to create step_tasks table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_step_tasks_visible_at
            ON step_tasks(visible_at)
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(format!("Failed to create index: {}", e)))?;

        Ok(())
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(QueueError::Closed)
        }
    }

    async fn insert(&self, task: StepTask, delay: Duration) -> QueueResult<()> {
        self.ensure_open()?;
        let payload = serde_json::to_value(&task)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO step_tasks (id, operation_id, payload, visible_at)
            VALUES ($1, $2, $3, NOW() + make_interval(secs => $4))
        "#,
        )
        .bind(Uuid::new_v4())
        .bind(task.operation_id.as_i64())
        .bind(payload)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(format!("Failed to enqueue step task: {}", e)))?;

        debug!(
            operation_id = %task.operation_id,
            step = %task.step,
            attempt = task.attempt,
            delay_secs = delay.as_secs(),
            "Queued step task"
        );
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    async fn open(&self) -> QueueResult<()> {
        self.init_schema().await?;
        self.open.store(true, Ordering::Release);
        info!("Task queue opened");
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        self.open.store(false, Ordering::Release);
        info!("Task queue closed");
        Ok(())
    }

    async fn enqueue(&self, task: StepTask) -> QueueResult<()> {
        self.insert(task, Duration::ZERO).await
    }

    async fn schedule(&self, task: StepTask, delay: Duration) -> QueueResult<()> {
        self.insert(task, delay).await
    }

    async fn dequeue(&self) -> QueueResult<Option<Delivery>> {
        self.ensure_open()?;

        let row = sqlx::query(
            r#"
            UPDATE step_tasks
            SET leased_until = NOW() + make_interval(secs => $1)
            WHERE id = (
                SELECT id FROM step_tasks
                WHERE visible_at <= NOW()
                  AND (leased_until IS NULL OR leased_until <= NOW())
                ORDER BY visible_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload
        "#,
        )
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(format!("Failed to dequeue step task: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: Uuid = row.get("id");
        let payload: serde_json::Value = row.get("payload");
        let task: StepTask = match serde_json::from_value(payload) {
            Ok(task) => task,
            Err(e) => {
                // a row nobody can decode would be redelivered forever
                error!("Discarding undecodable step task {}: {}", id, e);
                sqlx::query("DELETE FROM step_tasks WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        QueueError::Backend(format!("Failed to discard step task {}: {}", id, e))
                    })?;
                return Err(QueueError::Serialization(format!(
                    "step task {} could not be decoded: {}",
                    id, e
                )));
            }
        };

        Ok(Some(Delivery {
            id: DeliveryId(id),
            task,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.ensure_open()?;

        sqlx::query("DELETE FROM step_tasks WHERE id = $1")
            .bind(delivery.id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(format!("Failed to ack step task: {}", e)))?;

        Ok(())
    }
}
