//! Cloud Resource Ports
//!
//! Certificate store, load balancer and CDN interfaces. Delete, detach and
//! disable calls report `RemoteError::NotFound` when the resource is already
//! gone; callers decide whether that absence is acceptable.

use crate::remote_error::RemoteResult;
use async_trait::async_trait;
use domain_broker_core::{ForwardCookiePolicy, StoredCertificate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateUpload {
    pub path: String,
    pub name: String,
    pub private_key_pem: String,
    pub leaf_pem: String,
    pub chain_pem: String,
}

#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Upload a server certificate; `AlreadyExists` if the name is taken
    async fn upload_certificate(&self, upload: &CertificateUpload)
    -> RemoteResult<StoredCertificate>;

    /// Look an uploaded certificate up by name
    async fn get_certificate(&self, name: &str) -> RemoteResult<Option<StoredCertificate>>;

    async fn delete_certificate(&self, name: &str) -> RemoteResult<()>;
}

/// Alias target of a load balancer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerDns {
    pub dns_name: String,
    pub hosted_zone_id: String,
}

#[async_trait]
pub trait LoadBalancerClient: Send + Sync {
    async fn list_load_balancers(&self) -> RemoteResult<Vec<String>>;

    /// ARN of the HTTPS listener of a load balancer
    async fn https_listener(&self, load_balancer_arn: &str) -> RemoteResult<String>;

    async fn listener_certificate_count(&self, listener_arn: &str) -> RemoteResult<usize>;

    /// Add a certificate to a listener; attaching twice is a no-op
    async fn attach_certificate(&self, listener_arn: &str, certificate_arn: &str)
    -> RemoteResult<()>;

    async fn detach_certificate(&self, listener_arn: &str, certificate_arn: &str)
    -> RemoteResult<()>;

    async fn dns_name(&self, load_balancer_arn: &str) -> RemoteResult<LoadBalancerDns>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRequest {
    /// Idempotency token: a repeated create with the same reference returns
    /// the distribution created the first time
    pub caller_reference: String,
    pub domain_names: Vec<String>,
    pub origin_hostname: String,
    pub origin_path: String,
    pub certificate_id: String,
    pub forward_cookie_policy: ForwardCookiePolicy,
    pub forwarded_cookies: Vec<String>,
    pub forwarded_headers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub id: String,
    pub arn: String,
    pub domain_name: String,
    pub hosted_zone_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionStatus {
    pub enabled: bool,
    pub deployed: bool,
}

#[async_trait]
pub trait CdnClient: Send + Sync {
    async fn create_distribution(&self, request: &DistributionRequest)
    -> RemoteResult<Distribution>;

    /// Point the distribution's viewer certificate at `certificate_id`
    async fn update_certificate(&self, distribution_id: &str, certificate_id: &str)
    -> RemoteResult<()>;

    async fn disable_distribution(&self, distribution_id: &str) -> RemoteResult<()>;

    async fn distribution_status(&self, distribution_id: &str) -> RemoteResult<DistributionStatus>;

    async fn delete_distribution(&self, distribution_id: &str) -> RemoteResult<()>;
}
