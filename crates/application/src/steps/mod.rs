//! Step Catalogue
//!
//! One async routine per `StepId`. Every routine follows the same shape:
//! record a human readable step description, perform one externally
//! idempotent action, then commit the instance and the operation together.
//! Re-running a step after a crash or a redelivery converges on the same
//! persisted state, so the executor never needs to know how far a previous
//! attempt got.

mod cdn;
mod certificate;
mod dns;
mod lifecycle;
mod routing;

use crate::error::StepError;
use crate::settings::PipelineSettings;
use domain_broker_core::{AcmeAccount, Certificate, Operation, ServiceInstance, StepId};
use domain_broker_ports::{
    AcmeClient, CdnClient, CertificateStore, DnsProvider, EntityStore, LoadBalancerClient,
    RemoteError, RemoteResult,
};
use std::sync::Arc;
use tracing::debug;

/// Outbound ports every step may call
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn EntityStore>,
    pub acme: Arc<dyn AcmeClient>,
    pub dns: Arc<dyn DnsProvider>,
    pub certificates: Arc<dyn CertificateStore>,
    pub load_balancers: Arc<dyn LoadBalancerClient>,
    pub cdn: Arc<dyn CdnClient>,
}

/// State loaded for one step execution
#[derive(Debug, Clone)]
pub struct StepScope {
    pub operation: Operation,
    pub instance: ServiceInstance,
}

impl StepScope {
    pub fn new(operation: Operation, instance: ServiceInstance) -> Self {
        Self {
            operation,
            instance,
        }
    }
}

/// Runs catalogue steps against the configured collaborators
#[derive(Clone)]
pub struct StepRunner {
    collaborators: Collaborators,
    settings: PipelineSettings,
}

impl StepRunner {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            collaborators,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.collaborators.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn run(&self, step: StepId, scope: &mut StepScope) -> Result<(), StepError> {
        debug!("Running step {} for instance {}", step, scope.instance.id);
        match step {
            StepId::CreateAcmeAccount => self.create_acme_account(scope).await,
            StepId::GeneratePrivateKey => self.generate_private_key(scope).await,
            StepId::InitiateChallenges => self.initiate_challenges(scope).await,
            StepId::PublishValidationRecords => self.publish_validation_records(scope).await,
            StepId::WaitForDnsChanges => self.wait_for_dns_changes(scope).await,
            StepId::AnswerChallenges => self.answer_challenges(scope).await,
            StepId::RetrieveCertificate => self.retrieve_certificate(scope).await,
            StepId::UploadCertificate => self.upload_certificate(scope).await,
            StepId::SelectLoadBalancer => self.select_load_balancer(scope).await,
            StepId::AttachCertificate => self.attach_certificate(scope).await,
            StepId::CreateDistribution => self.create_distribution(scope).await,
            StepId::WaitForDistributionDeployed => self.wait_for_distribution_deployed(scope).await,
            StepId::PublishAliasRecords => self.publish_alias_records(scope).await,
            StepId::RemovePreviousCertificate => self.remove_previous_certificate(scope).await,
            StepId::MarkProvisioned => self.mark_provisioned(scope).await,
            StepId::CancelPendingProvisioning => self.cancel_pending_provisioning(scope).await,
            StepId::RemoveAliasRecords => self.remove_alias_records(scope).await,
            StepId::RemoveValidationRecords => self.remove_validation_records(scope).await,
            StepId::DetachCertificate => self.detach_certificate(scope).await,
            StepId::DisableDistribution => self.disable_distribution(scope).await,
            StepId::WaitForDistributionDisabled => self.wait_for_distribution_disabled(scope).await,
            StepId::DeleteDistribution => self.delete_distribution(scope).await,
            StepId::DeleteCertificate => self.delete_certificate(scope).await,
            StepId::MarkDeprovisioned => self.mark_deprovisioned(scope).await,
        }
    }

    /// Record the step description; the commit doubles as the heartbeat the
    /// stall scanner watches.
    async fn describe(&self, scope: &mut StepScope, description: &str) -> Result<(), StepError> {
        scope.operation.describe(description);
        self.commit(scope).await
    }

    async fn commit(&self, scope: &StepScope) -> Result<(), StepError> {
        self.collaborators
            .store
            .commit(&scope.instance, &scope.operation)
            .await?;
        Ok(())
    }

    async fn acme_account(&self, instance: &ServiceInstance) -> Result<AcmeAccount, StepError> {
        let account_id = instance.acme_account_id.ok_or_else(|| {
            StepError::fatal(format!("instance {} has no ACME account", instance.id))
        })?;
        self.collaborators
            .store
            .get_acme_account(account_id)
            .await?
            .ok_or_else(|| StepError::fatal(format!("ACME account {} not found", account_id)))
    }
}

/// The certificate being issued in this cycle; `None` once it has been
/// swapped into the current slot, which turns the issuance steps into no-ops.
fn issuing(scope: &StepScope) -> Option<&Certificate> {
    scope.instance.new_certificate.as_ref()
}

/// Like [`issuing`] for steps that cannot run without a certificate in issuance
fn new_certificate(instance: &ServiceInstance) -> Result<&Certificate, StepError> {
    instance.new_certificate.as_ref().ok_or_else(|| {
        StepError::fatal(format!(
            "instance {} has no certificate in issuance",
            instance.id
        ))
    })
}

fn new_certificate_mut(instance: &mut ServiceInstance) -> Result<&mut Certificate, StepError> {
    let id = instance.id.clone();
    instance
        .new_certificate
        .as_mut()
        .ok_or_else(|| StepError::fatal(format!("instance {} has no certificate in issuance", id)))
}

/// Treat "already gone" as success for removal calls
fn absorb_not_found(result: RemoteResult<()>) -> RemoteResult<()> {
    match result {
        Err(RemoteError::NotFound(resource)) => {
            debug!("Resource already absent: {}", resource);
            Ok(())
        }
        other => other,
    }
}

/// Point the instance at a new alias target; records published for an older
/// target have to be written again.
fn set_alias_target(instance: &mut ServiceInstance, target: String, hosted_zone_id: String) {
    if instance.alias_target.as_deref() != Some(target.as_str())
        || instance.alias_hosted_zone.as_deref() != Some(hosted_zone_id.as_str())
    {
        instance.alias_records.clear();
    }
    instance.alias_target = Some(target);
    instance.alias_hosted_zone = Some(hosted_zone_id);
}
