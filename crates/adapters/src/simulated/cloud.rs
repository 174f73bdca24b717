//! Simulated certificate store, load balancers and CDN

use super::failures::FailurePlan;
use async_trait::async_trait;
use domain_broker_core::StoredCertificate;
use domain_broker_ports::{
    CdnClient, CertificateStore, CertificateUpload, Distribution, DistributionRequest,
    DistributionStatus, LoadBalancerClient, LoadBalancerDns, RemoteError, RemoteResult,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Hosted zone id every CloudFront distribution aliases into
pub const CDN_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

/// Server certificate store keyed by certificate name
#[derive(Clone, Default)]
pub struct SimulatedCertificateStore {
    certificates: Arc<Mutex<BTreeMap<String, StoredCertificate>>>,
    failures: FailurePlan,
}

impl SimulatedCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> &FailurePlan {
        &self.failures
    }

    pub async fn certificate_names(&self) -> Vec<String> {
        self.certificates.lock().await.keys().cloned().collect()
    }

    /// Delete a certificate behind the broker's back
    pub async fn remove_externally(&self, name: &str) {
        self.certificates.lock().await.remove(name);
    }
}

#[async_trait]
impl CertificateStore for SimulatedCertificateStore {
    async fn upload_certificate(
        &self,
        upload: &CertificateUpload,
    ) -> RemoteResult<StoredCertificate> {
        self.failures.check("upload_certificate")?;
        let mut certificates = self.certificates.lock().await;
        if certificates.contains_key(&upload.name) {
            return Err(RemoteError::AlreadyExists(upload.name.clone()));
        }
        let stored = StoredCertificate {
            name: upload.name.clone(),
            id: format!("ASCA{}", Uuid::new_v4().simple()).to_uppercase(),
            arn: format!(
                "arn:aws:iam::000000000000:server-certificate{}{}",
                upload.path, upload.name
            ),
        };
        certificates.insert(upload.name.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_certificate(&self, name: &str) -> RemoteResult<Option<StoredCertificate>> {
        self.failures.check("get_certificate")?;
        Ok(self.certificates.lock().await.get(name).cloned())
    }

    async fn delete_certificate(&self, name: &str) -> RemoteResult<()> {
        self.failures.check("delete_certificate")?;
        match self.certificates.lock().await.remove(name) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(name.to_string())),
        }
    }
}

struct LoadBalancer {
    listener_arn: String,
    dns_name: String,
    certificates: BTreeSet<String>,
}

/// Application load balancers, each with one HTTPS listener
#[derive(Clone, Default)]
pub struct SimulatedLoadBalancers {
    load_balancers: Arc<Mutex<BTreeMap<String, LoadBalancer>>>,
    failures: FailurePlan,
}

impl SimulatedLoadBalancers {
    pub fn new<I, S>(arns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let load_balancers = arns
            .into_iter()
            .enumerate()
            .map(|(index, arn)| {
                let arn = arn.into();
                let balancer = LoadBalancer {
                    listener_arn: format!("{}/listener/https", arn),
                    dns_name: format!("broker-alb-{}.elb.simulated", index),
                    certificates: BTreeSet::new(),
                };
                (arn, balancer)
            })
            .collect();
        Self {
            load_balancers: Arc::new(Mutex::new(load_balancers)),
            failures: FailurePlan::default(),
        }
    }

    pub fn failures(&self) -> &FailurePlan {
        &self.failures
    }

    /// Pre-load a listener with placeholder certificates
    pub async fn preload_certificates(&self, load_balancer_arn: &str, count: usize) {
        if let Some(balancer) = self.load_balancers.lock().await.get_mut(load_balancer_arn) {
            for index in 0..count {
                balancer
                    .certificates
                    .insert(format!("arn:preloaded/{}", index));
            }
        }
    }

    /// Certificates currently attached to the listener of `load_balancer_arn`
    pub async fn attached_certificates(&self, load_balancer_arn: &str) -> Vec<String> {
        self.load_balancers
            .lock()
            .await
            .get(load_balancer_arn)
            .map(|balancer| balancer.certificates.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn with_listener<T>(
        &self,
        listener_arn: &str,
        f: impl FnOnce(&mut LoadBalancer) -> RemoteResult<T> + Send,
    ) -> RemoteResult<T> {
        let mut load_balancers = self.load_balancers.lock().await;
        let balancer = load_balancers
            .values_mut()
            .find(|balancer| balancer.listener_arn == listener_arn)
            .ok_or_else(|| RemoteError::NotFound(listener_arn.to_string()))?;
        f(balancer)
    }
}

#[async_trait]
impl LoadBalancerClient for SimulatedLoadBalancers {
    async fn list_load_balancers(&self) -> RemoteResult<Vec<String>> {
        self.failures.check("list_load_balancers")?;
        Ok(self.load_balancers.lock().await.keys().cloned().collect())
    }

    async fn https_listener(&self, load_balancer_arn: &str) -> RemoteResult<String> {
        self.failures.check("https_listener")?;
        self.load_balancers
            .lock()
            .await
            .get(load_balancer_arn)
            .map(|balancer| balancer.listener_arn.clone())
            .ok_or_else(|| RemoteError::NotFound(load_balancer_arn.to_string()))
    }

    async fn listener_certificate_count(&self, listener_arn: &str) -> RemoteResult<usize> {
        self.failures.check("listener_certificate_count")?;
        self.with_listener(listener_arn, |balancer| Ok(balancer.certificates.len()))
            .await
    }

    async fn attach_certificate(
        &self,
        listener_arn: &str,
        certificate_arn: &str,
    ) -> RemoteResult<()> {
        self.failures.check("attach_certificate")?;
        let certificate_arn = certificate_arn.to_string();
        self.with_listener(listener_arn, move |balancer| {
            balancer.certificates.insert(certificate_arn);
            Ok(())
        })
        .await
    }

    async fn detach_certificate(
        &self,
        listener_arn: &str,
        certificate_arn: &str,
    ) -> RemoteResult<()> {
        self.failures.check("detach_certificate")?;
        let certificate_arn = certificate_arn.to_string();
        self.with_listener(listener_arn, move |balancer| {
            if balancer.certificates.remove(&certificate_arn) {
                Ok(())
            } else {
                Err(RemoteError::NotFound(certificate_arn))
            }
        })
        .await
    }

    async fn dns_name(&self, load_balancer_arn: &str) -> RemoteResult<LoadBalancerDns> {
        self.failures.check("dns_name")?;
        self.load_balancers
            .lock()
            .await
            .get(load_balancer_arn)
            .map(|balancer| LoadBalancerDns {
                dns_name: balancer.dns_name.clone(),
                hosted_zone_id: "ZSIMULATEDALB".to_string(),
            })
            .ok_or_else(|| RemoteError::NotFound(load_balancer_arn.to_string()))
    }
}

struct DistributionState {
    distribution: Distribution,
    certificate_id: String,
    enabled: bool,
    /// status polls left before the latest change is deployed
    pending_polls: u32,
}

#[derive(Default)]
struct CdnState {
    distributions: HashMap<String, DistributionState>,
    by_reference: HashMap<String, String>,
}

/// CloudFront-like distributions that deploy after a number of polls
#[derive(Clone, Default)]
pub struct SimulatedCdn {
    state: Arc<Mutex<CdnState>>,
    deploy_polls: u32,
    failures: FailurePlan,
}

impl SimulatedCdn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `distribution_status` calls that report an undeployed change
    pub fn with_deploy_polls(mut self, polls: u32) -> Self {
        self.deploy_polls = polls;
        self
    }

    pub fn failures(&self) -> &FailurePlan {
        &self.failures
    }

    pub async fn distribution_certificate(&self, distribution_id: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .distributions
            .get(distribution_id)
            .map(|state| state.certificate_id.clone())
    }

    pub async fn distribution_count(&self) -> usize {
        self.state.lock().await.distributions.len()
    }

    /// Delete a distribution behind the broker's back
    pub async fn remove_externally(&self, distribution_id: &str) {
        self.state.lock().await.distributions.remove(distribution_id);
    }
}

#[async_trait]
impl CdnClient for SimulatedCdn {
    async fn create_distribution(
        &self,
        request: &DistributionRequest,
    ) -> RemoteResult<Distribution> {
        self.failures.check("create_distribution")?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .by_reference
            .get(&request.caller_reference)
            .and_then(|id| state.distributions.get(id))
        {
            return Ok(existing.distribution.clone());
        }

        let id = format!("E{}", Uuid::new_v4().simple()).to_uppercase()[..14].to_string();
        let distribution = Distribution {
            arn: format!("arn:aws:cloudfront::000000000000:distribution/{}", id),
            domain_name: format!("{}.cloudfront.simulated", id.to_lowercase()),
            hosted_zone_id: CDN_HOSTED_ZONE_ID.to_string(),
            id: id.clone(),
        };
        state
            .by_reference
            .insert(request.caller_reference.clone(), id.clone());
        state.distributions.insert(
            id,
            DistributionState {
                distribution: distribution.clone(),
                certificate_id: request.certificate_id.clone(),
                enabled: true,
                pending_polls: self.deploy_polls,
            },
        );
        Ok(distribution)
    }

    async fn update_certificate(
        &self,
        distribution_id: &str,
        certificate_id: &str,
    ) -> RemoteResult<()> {
        self.failures.check("update_certificate")?;
        let mut state = self.state.lock().await;
        let distribution = state
            .distributions
            .get_mut(distribution_id)
            .ok_or_else(|| RemoteError::NotFound(distribution_id.to_string()))?;
        if distribution.certificate_id != certificate_id {
            distribution.certificate_id = certificate_id.to_string();
            distribution.pending_polls = self.deploy_polls;
        }
        Ok(())
    }

    async fn disable_distribution(&self, distribution_id: &str) -> RemoteResult<()> {
        self.failures.check("disable_distribution")?;
        let mut state = self.state.lock().await;
        let distribution = state
            .distributions
            .get_mut(distribution_id)
            .ok_or_else(|| RemoteError::NotFound(distribution_id.to_string()))?;
        if distribution.enabled {
            distribution.enabled = false;
            distribution.pending_polls = self.deploy_polls;
        }
        Ok(())
    }

    async fn distribution_status(&self, distribution_id: &str) -> RemoteResult<DistributionStatus> {
        self.failures.check("distribution_status")?;
        let mut state = self.state.lock().await;
        let distribution = state
            .distributions
            .get_mut(distribution_id)
            .ok_or_else(|| RemoteError::NotFound(distribution_id.to_string()))?;
        let deployed = distribution.pending_polls == 0;
        distribution.pending_polls = distribution.pending_polls.saturating_sub(1);
        Ok(DistributionStatus {
            enabled: distribution.enabled,
            deployed,
        })
    }

    async fn delete_distribution(&self, distribution_id: &str) -> RemoteResult<()> {
        self.failures.check("delete_distribution")?;
        let mut state = self.state.lock().await;
        match state.distributions.get(distribution_id) {
            None => Err(RemoteError::NotFound(distribution_id.to_string())),
            Some(distribution) if distribution.enabled => Err(RemoteError::Transient(format!(
                "distribution {} must be disabled before deletion",
                distribution_id
            ))),
            Some(_) => {
                state.distributions.remove(distribution_id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_broker_core::ForwardCookiePolicy;

    fn request(reference: &str) -> DistributionRequest {
        DistributionRequest {
            caller_reference: reference.to_string(),
            domain_names: vec!["a.example.com".to_string()],
            origin_hostname: "origin.example.com".to_string(),
            origin_path: String::new(),
            certificate_id: "CERT1".to_string(),
            forward_cookie_policy: ForwardCookiePolicy::All,
            forwarded_cookies: Vec::new(),
            forwarded_headers: vec!["Host".to_string()],
        }
    }

    #[tokio::test]
    async fn test_create_distribution_is_idempotent_per_reference() {
        let cdn = SimulatedCdn::new();
        let first = cdn.create_distribution(&request("ref-1")).await.unwrap();
        let again = cdn.create_distribution(&request("ref-1")).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(cdn.distribution_count().await, 1);
        assert_eq!(first.hosted_zone_id, CDN_HOSTED_ZONE_ID);
    }

    #[tokio::test]
    async fn test_enabled_distribution_cannot_be_deleted() {
        let cdn = SimulatedCdn::new();
        let distribution = cdn.create_distribution(&request("ref-2")).await.unwrap();
        assert!(matches!(
            cdn.delete_distribution(&distribution.id).await,
            Err(RemoteError::Transient(_))
        ));
        cdn.disable_distribution(&distribution.id).await.unwrap();
        cdn.delete_distribution(&distribution.id).await.unwrap();
        assert!(
            cdn.delete_distribution(&distribution.id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_upload_with_taken_name_reports_already_exists() {
        let store = SimulatedCertificateStore::new();
        let upload = CertificateUpload {
            path: "/alb/".to_string(),
            name: "instance-2026-01-01-cert".to_string(),
            private_key_pem: "key".to_string(),
            leaf_pem: "leaf".to_string(),
            chain_pem: "chain".to_string(),
        };
        store.upload_certificate(&upload).await.unwrap();
        assert!(matches!(
            store.upload_certificate(&upload).await,
            Err(RemoteError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_listener_certificate_count_follows_attach_and_detach() {
        let balancers = SimulatedLoadBalancers::new(["arn:lb/one"]);
        let listener = balancers.https_listener("arn:lb/one").await.unwrap();
        balancers.attach_certificate(&listener, "arn:cert/1").await.unwrap();
        balancers.attach_certificate(&listener, "arn:cert/1").await.unwrap();
        assert_eq!(balancers.listener_certificate_count(&listener).await.unwrap(), 1);

        balancers.detach_certificate(&listener, "arn:cert/1").await.unwrap();
        assert!(
            balancers
                .detach_certificate(&listener, "arn:cert/1")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
