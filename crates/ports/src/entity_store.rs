//! Entity Store Port
//!
//! Durable state of instances, operations and ACME accounts. The store is the
//! single source of truth: every step re-reads from it and commits to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_broker_core::{
    AcmeAccount, AcmeAccountId, InstanceId, NewOperation, Operation, OperationId, Result,
    ServiceInstance,
};

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_instance(&self, instance_id: &InstanceId) -> Result<Option<ServiceInstance>>;

    /// Insert or replace an instance; `updated_at` is set by the store
    async fn save_instance(&self, instance: &ServiceInstance) -> Result<()>;

    /// Insert a new `InProgress` operation and return it with its assigned id
    async fn create_operation(&self, operation: NewOperation) -> Result<Operation>;

    async fn get_operation(&self, operation_id: OperationId) -> Result<Option<Operation>>;

    /// Persist an operation and bump its `updated_at` heartbeat.
    ///
    /// A stored terminal state and a stored `canceled_at` win over the given
    /// copy (see [`Operation::written_over`]).
    async fn save_operation(&self, operation: &Operation) -> Result<()>;

    /// Bump only the `updated_at` heartbeat of an operation
    async fn touch_operation(&self, operation_id: OperationId) -> Result<()>;

    /// Persist the instance and the operation of one step atomically, with
    /// the same merge rule as [`EntityStore::save_operation`]
    async fn commit(&self, instance: &ServiceInstance, operation: &Operation) -> Result<()>;

    async fn operations_for_instance(&self, instance_id: &InstanceId) -> Result<Vec<Operation>>;

    /// In-progress, not canceled operations whose `updated_at <= cutoff`
    async fn find_stale_operations(&self, cutoff: DateTime<Utc>) -> Result<Vec<Operation>>;

    /// Active instances whose current certificate expires before `before`
    async fn find_expiring_instances(&self, before: DateTime<Utc>)
    -> Result<Vec<ServiceInstance>>;

    async fn get_acme_account(&self, account_id: AcmeAccountId) -> Result<Option<AcmeAccount>>;

    async fn save_acme_account(&self, account: &AcmeAccount) -> Result<()>;
}
