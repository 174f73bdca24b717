//! Service Instance Domain Entity
//!
//! A service instance is one customer's custom-domain TLS termination. It is a
//! tagged sum over the routing backend: a shared base (domains, certificates,
//! challenges, DNS bookkeeping) plus a kind-specific payload.

use crate::acme_account::AcmeAccountId;
use crate::operation::OperationId;
use crate::pipeline::ResourceKind;
use crate::{DomainError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Service instance identifier - Value Object (opaque, assigned by the caller)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Certificate identifier - Value Object, one per issuance cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateId(Uuid);

impl CertificateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CertificateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CertificateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcmeOrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl AcmeOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }
}

/// Reference to an order held by the certificate authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcmeOrder {
    pub uri: String,
    pub status: AcmeOrderStatus,
    pub expires_at: DateTime<Utc>,
}

impl AcmeOrder {
    /// An order can be reused while the CA still accepts answers for it.
    pub fn is_reusable(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, AcmeOrderStatus::Pending | AcmeOrderStatus::Ready)
            && self.expires_at > now
    }
}

/// Listener a routing certificate is (or will be) attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerBinding {
    pub load_balancer_arn: String,
    pub listener_arn: String,
}

/// Where an uploaded certificate lives in the cloud certificate store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCertificate {
    pub name: String,
    pub id: String,
    pub arn: String,
}

/// Certificate material for one issuance cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    pub private_key_pem: Option<String>,
    pub csr_pem: Option<String>,
    pub leaf_pem: Option<String>,
    pub fullchain_pem: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub order: Option<AcmeOrder>,
    pub stored: Option<StoredCertificate>,
    /// Routing instances only: listener chosen for this certificate
    pub binding: Option<ListenerBinding>,
    /// Operation whose pipeline is issuing this certificate
    pub issued_for: Option<OperationId>,
}

impl Certificate {
    pub fn new() -> Self {
        Self {
            id: CertificateId::new(),
            private_key_pem: None,
            csr_pem: None,
            leaf_pem: None,
            fullchain_pem: None,
            expires_at: None,
            order: None,
            stored: None,
            binding: None,
            issued_for: None,
        }
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key_pem.is_some() && self.csr_pem.is_some()
    }

    pub fn is_issued(&self) -> bool {
        self.leaf_pem.is_some() && self.expires_at.is_some()
    }

    pub fn clear_private_key(&mut self) {
        self.private_key_pem = None;
    }
}

impl Default for Certificate {
    fn default() -> Self {
        Self::new()
    }
}

/// A per-domain DNS-01 validation requirement of one issuance cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub certificate_id: CertificateId,
    pub domain: String,
    pub validation_domain: String,
    pub validation_contents: String,
    pub answered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ForwardCookiePolicy {
    All,
    #[default]
    None,
    Whitelist,
}

/// Load balancer currently serving a routing instance. Mirrors the binding
/// of the current certificate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoutingDetails {
    pub load_balancer_arn: Option<String>,
    pub listener_arn: Option<String>,
}

/// CDN distribution of a CDN instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CdnDetails {
    pub origin_hostname: String,
    pub origin_path: String,
    pub distribution_id: Option<String>,
    pub distribution_arn: Option<String>,
    pub distribution_domain: Option<String>,
    pub forward_cookie_policy: ForwardCookiePolicy,
    pub forwarded_cookies: Vec<String>,
    pub forwarded_headers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details")]
pub enum InstanceKind {
    Routing(RoutingDetails),
    Cdn(CdnDetails),
}

impl InstanceKind {
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            Self::Routing(_) => ResourceKind::Routing,
            Self::Cdn(_) => ResourceKind::Cdn,
        }
    }
}

/// Service instance aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: InstanceId,
    pub domain_names: Vec<String>,
    pub acme_account_id: Option<AcmeAccountId>,
    pub current_certificate: Option<Certificate>,
    pub new_certificate: Option<Certificate>,
    pub retiring_certificate: Option<Certificate>,
    pub challenges: Vec<Challenge>,
    pub dns_change_ids: Vec<String>,
    pub alias_target: Option<String>,
    pub alias_hosted_zone: Option<String>,
    pub alias_records: Vec<String>,
    pub kind: InstanceKind,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceInstance {
    pub fn new(id: InstanceId, domain_names: Vec<String>, kind: InstanceKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            domain_names: normalize_domain_names(domain_names),
            acme_account_id: None,
            current_certificate: None,
            new_certificate: None,
            retiring_certificate: None,
            challenges: Vec::new(),
            dns_change_ids: Vec::new(),
            alias_target: None,
            alias_hosted_zone: None,
            alias_records: Vec::new(),
            kind,
            deactivated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn routing(id: InstanceId, domain_names: Vec<String>) -> Self {
        Self::new(id, domain_names, InstanceKind::Routing(RoutingDetails::default()))
    }

    pub fn cdn(id: InstanceId, domain_names: Vec<String>, origin_hostname: impl Into<String>) -> Self {
        Self::new(
            id,
            domain_names,
            InstanceKind::Cdn(CdnDetails {
                origin_hostname: origin_hostname.into(),
                ..CdnDetails::default()
            }),
        )
    }

    pub fn resource_kind(&self) -> ResourceKind {
        self.kind.resource_kind()
    }

    pub fn is_active(&self) -> bool {
        self.deactivated_at.is_none()
    }

    pub fn cert_expires_at(&self) -> Option<DateTime<Utc>> {
        self.current_certificate
            .as_ref()
            .and_then(|certificate| certificate.expires_at)
    }

    pub fn routing_details(&self) -> Result<&RoutingDetails> {
        match &self.kind {
            InstanceKind::Routing(details) => Ok(details),
            InstanceKind::Cdn(_) => Err(self.wrong_kind(ResourceKind::Routing)),
        }
    }

    pub fn routing_details_mut(&mut self) -> Result<&mut RoutingDetails> {
        let error = self.wrong_kind(ResourceKind::Routing);
        match &mut self.kind {
            InstanceKind::Routing(details) => Ok(details),
            InstanceKind::Cdn(_) => Err(error),
        }
    }

    pub fn cdn_details(&self) -> Result<&CdnDetails> {
        match &self.kind {
            InstanceKind::Cdn(details) => Ok(details),
            InstanceKind::Routing(_) => Err(self.wrong_kind(ResourceKind::Cdn)),
        }
    }

    pub fn cdn_details_mut(&mut self) -> Result<&mut CdnDetails> {
        let error = self.wrong_kind(ResourceKind::Cdn);
        match &mut self.kind {
            InstanceKind::Cdn(details) => Ok(details),
            InstanceKind::Routing(_) => Err(error),
        }
    }

    /// Challenges belonging to the certificate currently being issued.
    pub fn pending_challenges(&self) -> Vec<&Challenge> {
        match &self.new_certificate {
            Some(certificate) => self
                .challenges
                .iter()
                .filter(|challenge| challenge.certificate_id == certificate.id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Swap the freshly issued certificate in: new becomes current and the
    /// previous current certificate moves to the retiring slot.
    ///
    /// Returns `false` when there was nothing to promote (already swapped).
    pub fn promote_new_certificate(&mut self) -> bool {
        let Some(new_certificate) = self.new_certificate.take() else {
            return false;
        };
        if let Some(previous) = self.current_certificate.replace(new_certificate) {
            self.retiring_certificate = Some(previous);
        }
        true
    }

    /// Drop private key material from every certificate slot.
    pub fn clear_private_keys(&mut self) {
        for certificate in [
            self.current_certificate.as_mut(),
            self.new_certificate.as_mut(),
            self.retiring_certificate.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            certificate.clear_private_key();
        }
    }

    fn wrong_kind(&self, expected: ResourceKind) -> DomainError {
        DomainError::Contract(format!(
            "instance {} is a {} instance, expected {}",
            self.id,
            self.resource_kind().as_str(),
            expected.as_str()
        ))
    }
}

/// Lower-case, trim and de-duplicate domain names, keeping first-seen order.
pub fn normalize_domain_names<I, S>(domains: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for domain in domains {
        let domain = domain.as_ref().trim().to_lowercase();
        if !domain.is_empty() && !normalized.contains(&domain) {
            normalized.push(domain);
        }
    }
    normalized
}

/// Parse the comma separated `domains` request parameter.
pub fn parse_domain_names(raw: &str) -> Vec<String> {
    normalize_domain_names(raw.split(','))
}
