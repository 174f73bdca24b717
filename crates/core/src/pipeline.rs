//! Pipeline Tables
//!
//! A pipeline is the ordered chain of steps that implements one
//! (resource kind, action) workflow. The chains are static data so that a
//! live request and a recovery scanner always rebuild the same sequence.

use crate::correlation::CorrelationId;
use crate::operation::{Action, OperationId};
use crate::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Routing backend of a service instance - Value Object (Enum)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Routing,
    Cdn,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Routing, ResourceKind::Cdn];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::Cdn => "cdn",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(kind: &str) -> Result<Self> {
        match kind {
            "routing" => Ok(Self::Routing),
            "cdn" => Ok(Self::Cdn),
            _ => Err(DomainError::Contract(format!("unknown resource kind: {}", kind))),
        }
    }
}

/// Step identifier - Value Object (Enum)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepId {
    CreateAcmeAccount,
    GeneratePrivateKey,
    InitiateChallenges,
    PublishValidationRecords,
    WaitForDnsChanges,
    AnswerChallenges,
    RetrieveCertificate,
    UploadCertificate,
    SelectLoadBalancer,
    AttachCertificate,
    CreateDistribution,
    WaitForDistributionDeployed,
    PublishAliasRecords,
    RemovePreviousCertificate,
    MarkProvisioned,
    CancelPendingProvisioning,
    RemoveAliasRecords,
    RemoveValidationRecords,
    DetachCertificate,
    DisableDistribution,
    WaitForDistributionDisabled,
    DeleteDistribution,
    DeleteCertificate,
    MarkDeprovisioned,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateAcmeAccount => "create-acme-account",
            Self::GeneratePrivateKey => "generate-private-key",
            Self::InitiateChallenges => "initiate-challenges",
            Self::PublishValidationRecords => "publish-validation-records",
            Self::WaitForDnsChanges => "wait-for-dns-changes",
            Self::AnswerChallenges => "answer-challenges",
            Self::RetrieveCertificate => "retrieve-certificate",
            Self::UploadCertificate => "upload-certificate",
            Self::SelectLoadBalancer => "select-load-balancer",
            Self::AttachCertificate => "attach-certificate",
            Self::CreateDistribution => "create-distribution",
            Self::WaitForDistributionDeployed => "wait-for-distribution-deployed",
            Self::PublishAliasRecords => "publish-alias-records",
            Self::RemovePreviousCertificate => "remove-previous-certificate",
            Self::MarkProvisioned => "mark-provisioned",
            Self::CancelPendingProvisioning => "cancel-pending-provisioning",
            Self::RemoveAliasRecords => "remove-alias-records",
            Self::RemoveValidationRecords => "remove-validation-records",
            Self::DetachCertificate => "detach-certificate",
            Self::DisableDistribution => "disable-distribution",
            Self::WaitForDistributionDisabled => "wait-for-distribution-disabled",
            Self::DeleteDistribution => "delete-distribution",
            Self::DeleteCertificate => "delete-certificate",
            Self::MarkDeprovisioned => "mark-deprovisioned",
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the retry runtime treats a transient failure of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetryClass {
    /// Rescheduled with a fixed delay until the attempt budget runs out.
    Retriable,
    /// Run once; a failure is logged and the chain moves on.
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub id: StepId,
    pub retry: RetryClass,
}

impl StepDescriptor {
    pub const fn retriable(id: StepId) -> Self {
        Self {
            id,
            retry: RetryClass::Retriable,
        }
    }

    pub const fn best_effort(id: StepId) -> Self {
        Self {
            id,
            retry: RetryClass::BestEffort,
        }
    }
}

use StepDescriptor as S;
use StepId::*;

const PROVISION_ROUTING: &[StepDescriptor] = &[
    S::retriable(CreateAcmeAccount),
    S::retriable(GeneratePrivateKey),
    S::retriable(InitiateChallenges),
    S::retriable(PublishValidationRecords),
    S::retriable(WaitForDnsChanges),
    S::retriable(AnswerChallenges),
    S::retriable(RetrieveCertificate),
    S::retriable(UploadCertificate),
    S::retriable(SelectLoadBalancer),
    S::retriable(AttachCertificate),
    S::retriable(PublishAliasRecords),
    S::retriable(WaitForDnsChanges),
    S::retriable(MarkProvisioned),
];

const PROVISION_CDN: &[StepDescriptor] = &[
    S::retriable(CreateAcmeAccount),
    S::retriable(GeneratePrivateKey),
    S::retriable(InitiateChallenges),
    S::retriable(PublishValidationRecords),
    S::retriable(WaitForDnsChanges),
    S::retriable(AnswerChallenges),
    S::retriable(RetrieveCertificate),
    S::retriable(UploadCertificate),
    S::retriable(CreateDistribution),
    S::retriable(WaitForDistributionDeployed),
    S::retriable(PublishAliasRecords),
    S::retriable(WaitForDnsChanges),
    S::retriable(MarkProvisioned),
];

const DEPROVISION_ROUTING: &[StepDescriptor] = &[
    S::retriable(CancelPendingProvisioning),
    S::best_effort(RemoveAliasRecords),
    S::best_effort(RemoveValidationRecords),
    S::retriable(DetachCertificate),
    S::retriable(DeleteCertificate),
    S::retriable(MarkDeprovisioned),
];

const DEPROVISION_CDN: &[StepDescriptor] = &[
    S::retriable(CancelPendingProvisioning),
    S::best_effort(RemoveAliasRecords),
    S::best_effort(RemoveValidationRecords),
    S::retriable(DisableDistribution),
    S::retriable(WaitForDistributionDisabled),
    S::retriable(DeleteDistribution),
    S::retriable(DeleteCertificate),
    S::retriable(MarkDeprovisioned),
];

const RENEW_ROUTING: &[StepDescriptor] = &[
    S::retriable(GeneratePrivateKey),
    S::retriable(InitiateChallenges),
    S::retriable(PublishValidationRecords),
    S::retriable(WaitForDnsChanges),
    S::retriable(AnswerChallenges),
    S::retriable(RetrieveCertificate),
    S::retriable(UploadCertificate),
    S::retriable(SelectLoadBalancer),
    S::retriable(AttachCertificate),
    S::retriable(PublishAliasRecords),
    S::retriable(WaitForDnsChanges),
    S::retriable(RemovePreviousCertificate),
    S::retriable(MarkProvisioned),
];

const RENEW_CDN: &[StepDescriptor] = &[
    S::retriable(GeneratePrivateKey),
    S::retriable(InitiateChallenges),
    S::retriable(PublishValidationRecords),
    S::retriable(WaitForDnsChanges),
    S::retriable(AnswerChallenges),
    S::retriable(RetrieveCertificate),
    S::retriable(UploadCertificate),
    S::retriable(AttachCertificate),
    S::retriable(WaitForDistributionDeployed),
    S::retriable(PublishAliasRecords),
    S::retriable(WaitForDnsChanges),
    S::retriable(RemovePreviousCertificate),
    S::retriable(MarkProvisioned),
];

/// One (resource kind, action) chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipeline {
    pub kind: ResourceKind,
    pub action: Action,
    steps: &'static [StepDescriptor],
}

impl Pipeline {
    pub fn steps(&self) -> &'static [StepDescriptor] {
        self.steps
    }

    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|descriptor| descriptor.id).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&'static StepDescriptor> {
        self.steps.get(position)
    }

    /// Task for the head of the chain, attempt 1.
    pub fn first_task(
        &self,
        operation_id: OperationId,
        correlation_id: CorrelationId,
    ) -> Result<StepTask> {
        let head = self.get(0).ok_or_else(|| {
            DomainError::Contract(format!(
                "empty pipeline for {} {}",
                self.kind.as_str(),
                self.action
            ))
        })?;
        Ok(StepTask::new(operation_id, correlation_id, head.id, 0))
    }

    /// Task for the step after `task`, or `None` at the end of the chain.
    pub fn next_task(&self, task: &StepTask) -> Option<StepTask> {
        let position = task.position + 1;
        self.get(position).map(|descriptor| {
            StepTask::new(
                task.operation_id,
                task.correlation_id.clone(),
                descriptor.id,
                position,
            )
        })
    }
}

pub struct PipelineBuilder;

impl PipelineBuilder {
    pub fn chain(kind: ResourceKind, action: Action) -> Pipeline {
        let steps = match (kind, action) {
            (ResourceKind::Routing, Action::Provision) => PROVISION_ROUTING,
            (ResourceKind::Cdn, Action::Provision) => PROVISION_CDN,
            (ResourceKind::Routing, Action::Deprovision) => DEPROVISION_ROUTING,
            (ResourceKind::Cdn, Action::Deprovision) => DEPROVISION_CDN,
            (ResourceKind::Routing, Action::Renew) => RENEW_ROUTING,
            (ResourceKind::Cdn, Action::Renew) => RENEW_CDN,
        };
        Pipeline {
            kind,
            action,
            steps,
        }
    }
}

/// A step bound to an operation, as carried by the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTask {
    pub operation_id: OperationId,
    pub correlation_id: CorrelationId,
    pub step: StepId,
    pub position: usize,
    pub attempt: u32,
}

impl StepTask {
    pub fn new(
        operation_id: OperationId,
        correlation_id: CorrelationId,
        step: StepId,
        position: usize,
    ) -> Self {
        Self {
            operation_id,
            correlation_id,
            step,
            position,
            attempt: 1,
        }
    }

    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}
