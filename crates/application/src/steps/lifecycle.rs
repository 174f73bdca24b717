//! Terminal steps and cross-operation bookkeeping

use super::{StepRunner, StepScope};
use crate::error::StepError;
use domain_broker_core::{Action, Utc};
use tracing::info;

const COMPLETE: &str = "Complete!";

impl StepRunner {
    pub(super) async fn mark_provisioned(&self, scope: &mut StepScope) -> Result<(), StepError> {
        scope.operation.succeed()?;
        scope.operation.describe(COMPLETE);
        self.commit(scope).await?;
        info!(
            "{} of instance {} succeeded",
            scope.operation.action, scope.instance.id
        );
        Ok(())
    }

    /// A deprovision supersedes any provisioning still running for the same
    /// instance; those chains halt at their next step.
    pub(super) async fn cancel_pending_provisioning(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Canceling pending provisioning").await?;

        let store = &self.collaborators.store;
        let now = Utc::now();
        for mut operation in store.operations_for_instance(&scope.instance.id).await? {
            if operation.id == scope.operation.id
                || operation.action != Action::Provision
                || !operation.is_open()
            {
                continue;
            }
            operation.cancel(now);
            store.save_operation(&operation).await?;
            info!(
                "Canceled provisioning operation {} of instance {}",
                operation.id, scope.instance.id
            );
        }
        Ok(())
    }

    pub(super) async fn mark_deprovisioned(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        if scope.instance.deactivated_at.is_none() {
            scope.instance.deactivated_at = Some(Utc::now());
        }
        scope.instance.clear_private_keys();
        scope.operation.succeed()?;
        scope.operation.describe(COMPLETE);
        self.commit(scope).await?;
        info!("Instance {} deprovisioned", scope.instance.id);
        Ok(())
    }
}
