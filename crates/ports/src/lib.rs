//! Ports - Abstraction Layer
//!
//! This crate defines ports (traits) that represent the interfaces
//! needed by the application layer. These are implemented by adapters
//! in the infrastructure layer.

pub mod acme_client;
pub mod cloud;
pub mod dns_provider;
pub mod entity_store;
pub mod remote_error;
pub mod task_queue;

pub use crate::acme_client::{AcmeClient, ChallengeSpec, GeneratedKey, IssuedCertificate, NewOrder};
pub use crate::cloud::{
    CdnClient, CertificateStore, CertificateUpload, Distribution, DistributionRequest,
    DistributionStatus, LoadBalancerClient, LoadBalancerDns,
};
pub use crate::dns_provider::{ChangeStatus, CnameResolver, DnsProvider, DnsRecord};
pub use crate::entity_store::EntityStore;
pub use crate::remote_error::{RemoteError, RemoteResult};
pub use crate::task_queue::{Delivery, DeliveryId, QueueError, QueueResult, TaskQueue};
