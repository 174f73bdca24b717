//! Load balancer steps and certificate retirement

use super::{
    StepRunner, StepScope, absorb_not_found, issuing, new_certificate_mut, set_alias_target,
};
use crate::error::StepError;
use domain_broker_core::{
    Certificate, InstanceKind, ListenerBinding, ResourceKind, ServiceInstance,
};
use tracing::info;

impl StepRunner {
    pub(super) async fn select_load_balancer(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Selecting load balancer").await?;
        scope.instance.routing_details()?;

        if issuing(scope).is_none_or(|certificate| certificate.binding.is_some()) {
            return Ok(());
        }

        let candidates = if self.settings.load_balancer_arns.is_empty() {
            self.collaborators
                .load_balancers
                .list_load_balancers()
                .await?
        } else {
            self.settings.load_balancer_arns.clone()
        };

        let mut selected: Option<(ListenerBinding, usize)> = None;
        for load_balancer_arn in candidates {
            let listener_arn = self
                .collaborators
                .load_balancers
                .https_listener(&load_balancer_arn)
                .await?;
            let count = self
                .collaborators
                .load_balancers
                .listener_certificate_count(&listener_arn)
                .await?;
            if selected.as_ref().is_none_or(|(_, least)| count < *least) {
                selected = Some((
                    ListenerBinding {
                        load_balancer_arn,
                        listener_arn,
                    },
                    count,
                ));
            }
        }

        let (binding, count) =
            selected.ok_or_else(|| StepError::fatal("no load balancers available"))?;
        info!(
            "Selected load balancer {} ({} certificates) for instance {}",
            binding.load_balancer_arn, count, scope.instance.id
        );
        new_certificate_mut(&mut scope.instance)?.binding = Some(binding);
        self.commit(scope).await
    }

    /// Serve the new certificate, then swap it into the current slot.
    pub(super) async fn attach_certificate(&self, scope: &mut StepScope) -> Result<(), StepError> {
        let kind = scope.instance.resource_kind();
        let description = match kind {
            ResourceKind::Routing => "Adding SSL certificate to load balancer",
            ResourceKind::Cdn => "Updating CloudFront distribution certificate",
        };
        self.describe(scope, description).await?;

        let Some(certificate) = issuing(scope) else {
            return Ok(());
        };
        let stored = certificate
            .stored
            .clone()
            .ok_or_else(|| StepError::fatal("certificate in issuance has not been uploaded"))?;
        let binding = certificate.binding.clone();

        match kind {
            ResourceKind::Routing => {
                let binding = binding.ok_or_else(|| {
                    StepError::fatal("certificate in issuance has no load balancer")
                })?;
                self.collaborators
                    .load_balancers
                    .attach_certificate(&binding.listener_arn, &stored.arn)
                    .await?;
                let dns = self
                    .collaborators
                    .load_balancers
                    .dns_name(&binding.load_balancer_arn)
                    .await?;

                let details = scope.instance.routing_details_mut()?;
                details.load_balancer_arn = Some(binding.load_balancer_arn);
                details.listener_arn = Some(binding.listener_arn);
                set_alias_target(&mut scope.instance, dns.dns_name, dns.hosted_zone_id);
            }
            ResourceKind::Cdn => {
                let distribution_id = scope
                    .instance
                    .cdn_details()?
                    .distribution_id
                    .clone()
                    .ok_or_else(|| {
                        StepError::fatal(format!(
                            "instance {} has no distribution",
                            scope.instance.id
                        ))
                    })?;
                self.collaborators
                    .cdn
                    .update_certificate(&distribution_id, &stored.id)
                    .await?;
            }
        }

        scope.instance.promote_new_certificate();
        info!(
            "Certificate {} now serves instance {}",
            stored.name, scope.instance.id
        );
        self.commit(scope).await
    }

    pub(super) async fn detach_certificate(&self, scope: &mut StepScope) -> Result<(), StepError> {
        self.describe(scope, "Removing SSL certificate from load balancer")
            .await?;
        scope.instance.routing_details()?;

        let instance = &scope.instance;
        for certificate in held_certificates(instance) {
            let (Some(binding), Some(stored)) = (&certificate.binding, &certificate.stored) else {
                continue;
            };
            absorb_not_found(
                self.collaborators
                    .load_balancers
                    .detach_certificate(&binding.listener_arn, &stored.arn)
                    .await,
            )?;
        }

        let details = scope.instance.routing_details_mut()?;
        details.load_balancer_arn = None;
        details.listener_arn = None;
        self.commit(scope).await
    }

    /// Retire the certificate replaced by a renewal.
    pub(super) async fn remove_previous_certificate(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Removing old SSL certificate").await?;

        let Some(retiring) = scope.instance.retiring_certificate.clone() else {
            return Ok(());
        };
        if let Some(stored) = &retiring.stored {
            if let (InstanceKind::Routing(_), Some(binding)) =
                (&scope.instance.kind, &retiring.binding)
            {
                absorb_not_found(
                    self.collaborators
                        .load_balancers
                        .detach_certificate(&binding.listener_arn, &stored.arn)
                        .await,
                )?;
            }
            absorb_not_found(
                self.collaborators
                    .certificates
                    .delete_certificate(&stored.name)
                    .await,
            )?;
            info!("Removed old certificate {}", stored.name);
        }

        scope.instance.retiring_certificate = None;
        self.commit(scope).await
    }

    pub(super) async fn delete_certificate(&self, scope: &mut StepScope) -> Result<(), StepError> {
        self.describe(scope, "Removing SSL certificate from AWS").await?;

        let instance = &scope.instance;
        for certificate in held_certificates(instance) {
            if let Some(stored) = &certificate.stored {
                absorb_not_found(
                    self.collaborators
                        .certificates
                        .delete_certificate(&stored.name)
                        .await,
                )?;
            }
        }
        Ok(())
    }
}

/// Every certificate slot of the instance; a canceled provision may leave an
/// uploaded one behind in `new_certificate`.
fn held_certificates(instance: &ServiceInstance) -> impl Iterator<Item = &Certificate> {
    [
        &instance.current_certificate,
        &instance.new_certificate,
        &instance.retiring_certificate,
    ]
    .into_iter()
    .flatten()
}
