//! Operation Service
//!
//! Entry point for callers: validates a request, persists the instance and a
//! new operation, and enqueues the head of the matching chain. Callers then
//! poll `get_operation_status`.

use crate::error::Result;
use domain_broker_core::{
    Action, CdnDetails, CorrelationId, DomainError, ForwardCookiePolicy, InstanceId,
    InstanceKind, NewOperation, OperationId, OperationStatus, PipelineBuilder, ResourceKind,
    RoutingDetails, ServiceInstance, parse_domain_names,
};
use domain_broker_ports::{CnameResolver, EntityStore, TaskQueue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Caller supplied parameters; only `Provision` reads them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationParameters {
    pub kind: Option<ResourceKind>,
    /// Comma separated domain names
    pub domains: Option<String>,
    /// CDN only: origin host name
    pub origin: Option<String>,
    /// CDN only: path prefix on the origin
    pub path: Option<String>,
    /// CDN only: `*` for all cookies, empty for none, otherwise a comma
    /// separated whitelist
    pub forward_cookies: Option<String>,
    /// CDN only: comma separated header names
    pub forward_headers: Option<String>,
    /// Reuse a caller's correlation id instead of minting one
    pub correlation_id: Option<CorrelationId>,
}

pub struct OperationService {
    store: Arc<dyn EntityStore>,
    queue: Arc<dyn TaskQueue>,
    resolver: Arc<dyn CnameResolver>,
    root_domain: String,
}

impl OperationService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        queue: Arc<dyn TaskQueue>,
        resolver: Arc<dyn CnameResolver>,
        root_domain: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue,
            resolver,
            root_domain: root_domain.into(),
        }
    }

    /// Start `action` on `instance_id` and return the new operation's id.
    pub async fn start_operation(
        &self,
        instance_id: &InstanceId,
        action: Action,
        parameters: OperationParameters,
    ) -> Result<OperationId> {
        let existing = self.store.get_instance(instance_id).await?;
        let instance = match action {
            Action::Provision => {
                let instance = self
                    .provisioned_instance(instance_id, existing, &parameters)
                    .await?;
                self.store.save_instance(&instance).await?;
                instance
            }
            Action::Deprovision => {
                let instance = existing.ok_or_else(|| not_found(instance_id))?;
                if !instance.is_active() {
                    return Err(DomainError::Validation(format!(
                        "instance {} is already deprovisioned",
                        instance_id
                    ))
                    .into());
                }
                instance
            }
            Action::Renew => {
                let instance = existing.ok_or_else(|| not_found(instance_id))?;
                if !instance.is_active() || instance.current_certificate.is_none() {
                    return Err(DomainError::Validation(format!(
                        "instance {} has no active certificate to renew",
                        instance_id
                    ))
                    .into());
                }
                instance
            }
        };

        let operation = self
            .store
            .create_operation(NewOperation::new(instance.id.clone(), action))
            .await?;
        let correlation_id = parameters.correlation_id.unwrap_or_default();
        let pipeline = PipelineBuilder::chain(instance.resource_kind(), action);
        self.queue
            .enqueue(pipeline.first_task(operation.id, correlation_id.clone())?)
            .await?;

        info!(
            "{} operation {} started for instance {} (correlation {})",
            action, operation.id, instance.id, correlation_id
        );
        Ok(operation.id)
    }

    pub async fn get_operation_status(&self, operation_id: OperationId) -> Result<OperationStatus> {
        let operation = self
            .store
            .get_operation(operation_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("operation {}", operation_id)))?;
        Ok(OperationStatus::from(&operation))
    }

    async fn provisioned_instance(
        &self,
        instance_id: &InstanceId,
        existing: Option<ServiceInstance>,
        parameters: &OperationParameters,
    ) -> Result<ServiceInstance> {
        if existing.as_ref().is_some_and(ServiceInstance::is_active) {
            return Err(DomainError::Validation(format!(
                "instance {} already exists",
                instance_id
            ))
            .into());
        }

        let domains = parse_domain_names(parameters.domains.as_deref().unwrap_or_default());
        if domains.is_empty() {
            return Err(DomainError::Validation("no domains provided".to_string()).into());
        }
        self.validate_cnames(&domains).await?;

        let kind = match parameters.kind.unwrap_or(ResourceKind::Routing) {
            ResourceKind::Routing => InstanceKind::Routing(RoutingDetails::default()),
            ResourceKind::Cdn => InstanceKind::Cdn(cdn_details(parameters)?),
        };
        Ok(ServiceInstance::new(instance_id.clone(), domains, kind))
    }

    /// Every domain must delegate its ACME challenge to the broker's zone:
    /// `_acme-challenge.<domain>` CNAME `_acme-challenge.<domain>.<root>`.
    async fn validate_cnames(&self, domains: &[String]) -> Result<()> {
        let mut instructions = Vec::new();
        for domain in domains {
            let name = format!("_acme-challenge.{}", domain);
            let expected = format!("_acme-challenge.{}.{}", domain, self.root_domain);
            let resolved = self.resolver.resolve_cname(&name).await.ok().flatten();
            let matches = resolved.as_deref().is_some_and(|target| {
                target.trim_end_matches('.').eq_ignore_ascii_case(&expected)
            });
            if !matches {
                instructions.push(format!("  {} should have CNAME {}", name, expected));
            }
        }

        if instructions.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Validation(format!(
                "We could not verify the DNS records for your domains. Please add:\n{}",
                instructions.join("\n")
            ))
            .into())
        }
    }
}

fn not_found(instance_id: &InstanceId) -> DomainError {
    DomainError::NotFound(format!("instance {}", instance_id))
}

fn comma_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn cdn_details(parameters: &OperationParameters) -> Result<CdnDetails> {
    let origin_hostname = parameters
        .origin
        .as_deref()
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .ok_or_else(|| DomainError::Validation("origin is required for a CDN instance".into()))?
        .to_string();

    let (forward_cookie_policy, forwarded_cookies) = match parameters.forward_cookies.as_deref() {
        Some("*") => (ForwardCookiePolicy::All, Vec::new()),
        None | Some("") => (ForwardCookiePolicy::None, Vec::new()),
        Some(list) => (ForwardCookiePolicy::Whitelist, comma_list(Some(list))),
    };

    Ok(CdnDetails {
        origin_hostname,
        origin_path: parameters.path.clone().unwrap_or_default(),
        forward_cookie_policy,
        forwarded_cookies,
        forwarded_headers: comma_list(parameters.forward_headers.as_deref()),
        ..CdnDetails::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_whitelist_is_split() {
        let parameters = OperationParameters {
            origin: Some("origin.example.com".into()),
            forward_cookies: Some("session, theme".into()),
            forward_headers: Some("Host,".into()),
            ..OperationParameters::default()
        };
        let details = cdn_details(&parameters).unwrap();
        assert_eq!(details.forward_cookie_policy, ForwardCookiePolicy::Whitelist);
        assert_eq!(details.forwarded_cookies, vec!["session", "theme"]);
        assert_eq!(details.forwarded_headers, vec!["Host"]);
    }

    #[test]
    fn test_cdn_requires_origin() {
        let parameters = OperationParameters {
            origin: Some("  ".into()),
            ..OperationParameters::default()
        };
        assert!(cdn_details(&parameters).is_err());
    }

    #[test]
    fn test_star_forwards_all_cookies() {
        let parameters = OperationParameters {
            origin: Some("origin.example.com".into()),
            forward_cookies: Some("*".into()),
            ..OperationParameters::default()
        };
        assert_eq!(
            cdn_details(&parameters).unwrap().forward_cookie_policy,
            ForwardCookiePolicy::All
        );
    }
}
