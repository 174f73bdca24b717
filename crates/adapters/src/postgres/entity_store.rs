//! PostgreSQL Entity Store
//!
//! Instances are stored as JSONB documents with the columns the scanners
//! query (`cert_expires_at`, `deactivated_at`) kept alongside. Operations are
//! plain rows; `updated_at = NOW()` on every write is the stall heartbeat.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_broker_core::{
    AcmeAccount, AcmeAccountId, Action, DomainError, InstanceId, NewOperation, Operation,
    OperationId, OperationState, Result, ServiceInstance,
};
use domain_broker_ports::EntityStore;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use tracing::{debug, info};

/// PostgreSQL implementation of [`EntityStore`]
#[derive(Debug, Clone)]
pub struct PostgresEntityStore {
    pool: PgPool,
}

impl PostgresEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize database schema for instances, operations and ACME accounts
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing entity store schema");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS service_instances (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                document JSONB NOT NULL,
                cert_expires_at TIMESTAMPTZ NULL,
                deactivated_at TIMESTAMPTZ NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS operations (
                id BIGSERIAL PRIMARY KEY,
                instance_id TEXT NOT NULL,
                action TEXT NOT NULL,
                state TEXT NOT NULL,
                step_description TEXT NULL,
                canceled_at TIMESTAMPTZ NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS acme_accounts (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL,
                uri TEXT NOT NULL,
                private_key_pem TEXT NOT NULL,
                registration_json JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_operations_stale
            ON operations(state, updated_at) WHERE canceled_at IS NULL
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_operations_instance_id
            ON operations(instance_id)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_service_instances_cert_expires_at
            ON service_instances(cert_expires_at) WHERE deactivated_at IS NULL
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    DomainError::Infrastructure(format!("Failed to initialize schema: {}", e))
                })?;
        }

        info!("Entity store schema initialized successfully");
        Ok(())
    }

    async fn upsert_instance<'e, E: PgExecutor<'e>>(
        executor: E,
        instance: &ServiceInstance,
    ) -> Result<()> {
        let document = serde_json::to_value(instance).map_err(|e| {
            DomainError::Infrastructure(format!("Failed to serialize instance: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO service_instances (
                id, kind, document, cert_expires_at, deactivated_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (id) DO UPDATE SET
                document = EXCLUDED.document,
                cert_expires_at = EXCLUDED.cert_expires_at,
                deactivated_at = EXCLUDED.deactivated_at,
                updated_at = NOW()
        "#,
        )
        .bind(instance.id.as_str())
        .bind(instance.resource_kind().as_str())
        .bind(document)
        .bind(instance.cert_expires_at())
        .bind(instance.deactivated_at)
        .bind(instance.created_at)
        .execute(executor)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("Failed to save instance: {}", e)))?;

        Ok(())
    }

    async fn update_operation<'e, E: PgExecutor<'e>>(
        executor: E,
        operation: &Operation,
    ) -> Result<()> {
        // a terminal state or a cancellation already stored is never undone
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET state = CASE WHEN state = $5 THEN $1 ELSE state END,
                step_description = CASE WHEN state = $5 THEN $2 ELSE step_description END,
                canceled_at = COALESCE(canceled_at, $3),
                updated_at = NOW()
            WHERE id = $4
        "#,
        )
        .bind(operation.state.as_str())
        .bind(operation.step_description.as_deref())
        .bind(operation.canceled_at)
        .bind(operation.id.as_i64())
        .bind(OperationState::InProgress.as_str())
        .execute(executor)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("Failed to save operation: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("operation {}", operation.id)));
        }
        Ok(())
    }

    fn instance_from_row(row: &PgRow) -> Result<ServiceInstance> {
        let document: serde_json::Value = row.get("document");
        let mut instance: ServiceInstance = serde_json::from_value(document).map_err(|e| {
            DomainError::Infrastructure(format!("Failed to deserialize instance: {}", e))
        })?;
        instance.updated_at = row.get("updated_at");
        Ok(instance)
    }

    fn operation_from_row(row: &PgRow) -> Result<Operation> {
        let action: String = row.get("action");
        let state: String = row.get("state");

        Ok(Operation {
            id: OperationId(row.get("id")),
            instance_id: InstanceId::new(row.get::<String, _>("instance_id")),
            action: Action::from_str(&action)?,
            state: OperationState::from_str(&state)?,
            step_description: row.get("step_description"),
            canceled_at: row.get("canceled_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

const OPERATION_COLUMNS: &str =
    "id, instance_id, action, state, step_description, canceled_at, created_at, updated_at";

#[async_trait]
impl EntityStore for PostgresEntityStore {
    async fn get_instance(&self, instance_id: &InstanceId) -> Result<Option<ServiceInstance>> {
        let row = sqlx::query("SELECT document, updated_at FROM service_instances WHERE id = $1")
            .bind(instance_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::Infrastructure(format!("Failed to get instance: {}", e)))?;

        row.as_ref().map(Self::instance_from_row).transpose()
    }

    async fn save_instance(&self, instance: &ServiceInstance) -> Result<()> {
        debug!(instance_id = %instance.id, "Saving service instance");
        Self::upsert_instance(&self.pool, instance).await
    }

    async fn create_operation(&self, operation: NewOperation) -> Result<Operation> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO operations (instance_id, action, state, step_description)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            OPERATION_COLUMNS
        ))
        .bind(operation.instance_id.as_str())
        .bind(operation.action.as_str())
        .bind(OperationState::InProgress.as_str())
        .bind(operation.step_description.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("Failed to create operation: {}", e)))?;

        let operation = Self::operation_from_row(&row)?;
        info!(operation_id = %operation.id, action = %operation.action, "Created operation");
        Ok(operation)
    }

    async fn get_operation(&self, operation_id: OperationId) -> Result<Option<Operation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM operations WHERE id = $1",
            OPERATION_COLUMNS
        ))
        .bind(operation_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("Failed to get operation: {}", e)))?;

        row.as_ref().map(Self::operation_from_row).transpose()
    }

    async fn save_operation(&self, operation: &Operation) -> Result<()> {
        Self::update_operation(&self.pool, operation).await
    }

    async fn touch_operation(&self, operation_id: OperationId) -> Result<()> {
        let result = sqlx::query("UPDATE operations SET updated_at = NOW() WHERE id = $1")
            .bind(operation_id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DomainError::Infrastructure(format!("Failed to touch operation: {}", e))
            })?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("operation {}", operation_id)));
        }
        Ok(())
    }

    async fn commit(&self, instance: &ServiceInstance, operation: &Operation) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            DomainError::Infrastructure(format!("Failed to begin transaction: {}", e))
        })?;

        Self::upsert_instance(&mut *tx, instance).await?;
        Self::update_operation(&mut *tx, operation).await?;

        tx.commit().await.map_err(|e| {
            DomainError::Infrastructure(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }

    async fn operations_for_instance(&self, instance_id: &InstanceId) -> Result<Vec<Operation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM operations WHERE instance_id = $1 ORDER BY id",
            OPERATION_COLUMNS
        ))
        .bind(instance_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("Failed to list operations: {}", e)))?;

        rows.iter().map(Self::operation_from_row).collect()
    }

    async fn find_stale_operations(&self, cutoff: DateTime<Utc>) -> Result<Vec<Operation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM operations
            WHERE state = $1 AND canceled_at IS NULL AND updated_at <= $2
            ORDER BY id
            "#,
            OPERATION_COLUMNS
        ))
        .bind(OperationState::InProgress.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            DomainError::Infrastructure(format!("Failed to find stale operations: {}", e))
        })?;

        rows.iter().map(Self::operation_from_row).collect()
    }

    async fn find_expiring_instances(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ServiceInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT document, updated_at FROM service_instances
            WHERE deactivated_at IS NULL AND cert_expires_at < $1
            ORDER BY id
        "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            DomainError::Infrastructure(format!("Failed to find expiring instances: {}", e))
        })?;

        rows.iter().map(Self::instance_from_row).collect()
    }

    async fn get_acme_account(&self, account_id: AcmeAccountId) -> Result<Option<AcmeAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, uri, private_key_pem, registration_json, created_at
            FROM acme_accounts WHERE id = $1
        "#,
        )
        .bind(account_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("Failed to get ACME account: {}", e)))?;

        Ok(row.map(|row| AcmeAccount {
            id: AcmeAccountId::from_uuid(row.get("id")),
            email: row.get("email"),
            uri: row.get("uri"),
            private_key_pem: row.get("private_key_pem"),
            registration_json: row.get("registration_json"),
            created_at: row.get("created_at"),
        }))
    }

    async fn save_acme_account(&self, account: &AcmeAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO acme_accounts (id, email, uri, private_key_pem, registration_json, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                uri = EXCLUDED.uri,
                private_key_pem = EXCLUDED.private_key_pem,
                registration_json = EXCLUDED.registration_json
        "#,
        )
        .bind(account.id.as_uuid())
        .bind(&account.email)
        .bind(&account.uri)
        .bind(&account.private_key_pem)
        .bind(&account.registration_json)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::Infrastructure(format!("Failed to save ACME account: {}", e))
        })?;

        Ok(())
    }
}
