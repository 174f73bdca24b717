//! In-memory entity store
//!
//! Backs tests and local runs. Holds everything behind one `RwLock` so a step
//! commit (instance + operation) is atomic like the PostgreSQL transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_broker_core::{
    AcmeAccount, AcmeAccountId, DomainError, InstanceId, NewOperation, Operation, OperationId,
    OperationState, Result, ServiceInstance,
};
use domain_broker_ports::EntityStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct StoreState {
    instances: HashMap<InstanceId, ServiceInstance>,
    operations: BTreeMap<OperationId, Operation>,
    accounts: HashMap<AcmeAccountId, AcmeAccount>,
    next_operation_id: i64,
}

impl StoreState {
    fn put_instance(&mut self, instance: &ServiceInstance, now: DateTime<Utc>) {
        let mut instance = instance.clone();
        instance.updated_at = now;
        self.instances.insert(instance.id.clone(), instance);
    }

    fn put_operation(&mut self, operation: &Operation, now: DateTime<Utc>) -> Result<()> {
        let stored = self
            .operations
            .get_mut(&operation.id)
            .ok_or_else(|| DomainError::NotFound(format!("operation {}", operation.id)))?;
        let mut merged = operation.written_over(stored);
        merged.updated_at = now;
        *stored = merged;
        Ok(())
    }
}

/// In-memory implementation of [`EntityStore`]
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an operation exactly as given, without bumping `updated_at`.
    /// Lets tests place operations at any point in time.
    pub async fn seed_operation(&self, operation: Operation) {
        let mut state = self.state.write().await;
        state.next_operation_id = state.next_operation_id.max(operation.id.as_i64());
        state.operations.insert(operation.id, operation);
    }

    /// Move an operation's heartbeat to `updated_at`.
    pub async fn backdate_operation(&self, operation_id: OperationId, updated_at: DateTime<Utc>) {
        if let Some(operation) = self.state.write().await.operations.get_mut(&operation_id) {
            operation.updated_at = updated_at;
        }
    }

    /// Remove an instance, simulating external tampering in tests.
    pub async fn remove_instance(&self, instance_id: &InstanceId) {
        self.state.write().await.instances.remove(instance_id);
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_instance(&self, instance_id: &InstanceId) -> Result<Option<ServiceInstance>> {
        Ok(self.state.read().await.instances.get(instance_id).cloned())
    }

    async fn save_instance(&self, instance: &ServiceInstance) -> Result<()> {
        debug!(instance_id = %instance.id, "Saving service instance");
        self.state.write().await.put_instance(instance, Utc::now());
        Ok(())
    }

    async fn create_operation(&self, new_operation: NewOperation) -> Result<Operation> {
        let mut state = self.state.write().await;
        state.next_operation_id += 1;
        let now = Utc::now();
        let operation = Operation {
            id: OperationId(state.next_operation_id),
            instance_id: new_operation.instance_id,
            action: new_operation.action,
            state: OperationState::InProgress,
            step_description: new_operation.step_description,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        };
        state.operations.insert(operation.id, operation.clone());
        debug!(operation_id = %operation.id, action = %operation.action, "Created operation");
        Ok(operation)
    }

    async fn get_operation(&self, operation_id: OperationId) -> Result<Option<Operation>> {
        Ok(self.state.read().await.operations.get(&operation_id).cloned())
    }

    async fn save_operation(&self, operation: &Operation) -> Result<()> {
        self.state.write().await.put_operation(operation, Utc::now())
    }

    async fn touch_operation(&self, operation_id: OperationId) -> Result<()> {
        let mut state = self.state.write().await;
        let operation = state
            .operations
            .get_mut(&operation_id)
            .ok_or_else(|| DomainError::NotFound(format!("operation {}", operation_id)))?;
        operation.updated_at = Utc::now();
        Ok(())
    }

    async fn commit(&self, instance: &ServiceInstance, operation: &Operation) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        // operation first: a missing row must not leave a half-applied commit
        state.put_operation(operation, now)?;
        state.put_instance(instance, now);
        Ok(())
    }

    async fn operations_for_instance(&self, instance_id: &InstanceId) -> Result<Vec<Operation>> {
        Ok(self
            .state
            .read()
            .await
            .operations
            .values()
            .filter(|operation| &operation.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn find_stale_operations(&self, cutoff: DateTime<Utc>) -> Result<Vec<Operation>> {
        Ok(self
            .state
            .read()
            .await
            .operations
            .values()
            .filter(|operation| {
                operation.state == OperationState::InProgress
                    && operation.canceled_at.is_none()
                    && operation.updated_at <= cutoff
            })
            .cloned()
            .collect())
    }

    async fn find_expiring_instances(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ServiceInstance>> {
        let state = self.state.read().await;
        let mut instances: Vec<ServiceInstance> = state
            .instances
            .values()
            .filter(|instance| {
                instance.is_active()
                    && instance
                        .cert_expires_at()
                        .is_some_and(|expires_at| expires_at < before)
            })
            .cloned()
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    async fn get_acme_account(&self, account_id: AcmeAccountId) -> Result<Option<AcmeAccount>> {
        Ok(self.state.read().await.accounts.get(&account_id).cloned())
    }

    async fn save_acme_account(&self, account: &AcmeAccount) -> Result<()> {
        self.state
            .write()
            .await
            .accounts
            .insert(account.id, account.clone());
        Ok(())
    }
}
