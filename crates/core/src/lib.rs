//! Domain Core - Business Logic and Shared Types
//!
//! This crate contains the domain entities of the broker (service instances,
//! operations, ACME accounts), their value objects and the static pipeline
//! tables that drive every workflow.

pub mod acme_account;
pub mod correlation;
pub mod error;
pub mod instance;
pub mod operation;
pub mod pipeline;

pub use crate::error::DomainError;
pub use chrono::{DateTime, Utc};

pub use crate::acme_account::{AcmeAccount, AcmeAccountId};
pub use crate::correlation::CorrelationId;
pub use crate::instance::{
    AcmeOrder, AcmeOrderStatus, CdnDetails, Certificate, CertificateId, Challenge,
    ForwardCookiePolicy, InstanceId, InstanceKind, ListenerBinding, RoutingDetails, ServiceInstance,
    StoredCertificate, normalize_domain_names, parse_domain_names,
};
pub use crate::operation::{
    Action, NewOperation, Operation, OperationId, OperationState, OperationStatus,
};
pub use crate::pipeline::{
    Pipeline, PipelineBuilder, ResourceKind, RetryClass, StepDescriptor, StepId, StepTask,
};

/// Result type alias for domain operations
pub type Result<T> = std::result::Result<T, DomainError>;
