//! CDN distribution steps

use super::{StepRunner, StepScope, absorb_not_found, new_certificate, set_alias_target};
use crate::error::StepError;
use crate::settings::PollPolicy;
use domain_broker_ports::{DistributionRequest, DistributionStatus, RemoteError};
use tracing::{debug, info};

impl StepRunner {
    /// Create the distribution serving the freshly issued certificate.
    /// The caller reference makes a repeated create return the first one.
    pub(super) async fn create_distribution(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Creating CloudFront distribution").await?;

        let details = scope.instance.cdn_details()?;
        if details.distribution_id.is_none() {
            let certificate = new_certificate(&scope.instance)?;
            let stored = certificate.stored.as_ref().ok_or_else(|| {
                StepError::fatal("certificate in issuance has not been uploaded")
            })?;
            let request = DistributionRequest {
                caller_reference: format!("{}-{}", scope.instance.id, certificate.id),
                domain_names: scope.instance.domain_names.clone(),
                origin_hostname: details.origin_hostname.clone(),
                origin_path: details.origin_path.clone(),
                certificate_id: stored.id.clone(),
                forward_cookie_policy: details.forward_cookie_policy,
                forwarded_cookies: details.forwarded_cookies.clone(),
                forwarded_headers: details.forwarded_headers.clone(),
            };

            let distribution = self.collaborators.cdn.create_distribution(&request).await?;
            info!(
                "Created distribution {} for instance {}",
                distribution.id, scope.instance.id
            );

            let details = scope.instance.cdn_details_mut()?;
            details.distribution_id = Some(distribution.id);
            details.distribution_arn = Some(distribution.arn);
            details.distribution_domain = Some(distribution.domain_name.clone());
            set_alias_target(
                &mut scope.instance,
                distribution.domain_name,
                distribution.hosted_zone_id,
            );
        }

        scope.instance.promote_new_certificate();
        self.commit(scope).await
    }

    pub(super) async fn wait_for_distribution_deployed(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Waiting for CloudFront distribution").await?;

        let distribution_id = self.distribution_id(scope)?;
        self.poll_distribution(&distribution_id, false, |status| status.deployed)
            .await
    }

    pub(super) async fn disable_distribution(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Disabling CloudFront distribution").await?;

        let Some(distribution_id) = scope.instance.cdn_details()?.distribution_id.clone() else {
            return Ok(());
        };
        absorb_not_found(
            self.collaborators
                .cdn
                .disable_distribution(&distribution_id)
                .await,
        )?;
        Ok(())
    }

    pub(super) async fn wait_for_distribution_disabled(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Waiting for CloudFront distribution to disable")
            .await?;

        let Some(distribution_id) = scope.instance.cdn_details()?.distribution_id.clone() else {
            return Ok(());
        };
        self.poll_distribution(&distribution_id, true, |status| {
            !status.enabled && status.deployed
        })
        .await
    }

    pub(super) async fn delete_distribution(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Deleting CloudFront distribution").await?;

        let Some(distribution_id) = scope.instance.cdn_details()?.distribution_id.clone() else {
            return Ok(());
        };
        absorb_not_found(
            self.collaborators
                .cdn
                .delete_distribution(&distribution_id)
                .await,
        )?;
        info!("Deleted distribution {}", distribution_id);

        let details = scope.instance.cdn_details_mut()?;
        details.distribution_id = None;
        details.distribution_arn = None;
        details.distribution_domain = None;
        self.commit(scope).await
    }

    fn distribution_id(&self, scope: &StepScope) -> Result<String, StepError> {
        scope
            .instance
            .cdn_details()?
            .distribution_id
            .clone()
            .ok_or_else(|| {
                StepError::fatal(format!(
                    "instance {} has no distribution",
                    scope.instance.id
                ))
            })
    }

    /// Poll until `done` holds. With `missing_is_done` a distribution that
    /// no longer exists ends the wait as well.
    async fn poll_distribution(
        &self,
        distribution_id: &str,
        missing_is_done: bool,
        done: impl Fn(&DistributionStatus) -> bool,
    ) -> Result<(), StepError> {
        let PollPolicy {
            interval,
            max_attempts,
        } = self.settings.distribution_poll;

        for attempt in 1..=max_attempts {
            match self
                .collaborators
                .cdn
                .distribution_status(distribution_id)
                .await
            {
                Ok(status) if done(&status) => return Ok(()),
                Ok(_) => debug!(
                    "Distribution {} not settled (poll {}/{})",
                    distribution_id, attempt, max_attempts
                ),
                Err(RemoteError::NotFound(_)) if missing_is_done => return Ok(()),
                Err(RemoteError::NotFound(_)) => {
                    return Err(StepError::fatal(format!(
                        "distribution {} no longer exists",
                        distribution_id
                    )));
                }
                Err(err) => return Err(err.into()),
            }
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Err(StepError::transient(format!(
            "distribution {} not settled after {} polls",
            distribution_id, max_attempts
        )))
    }
}
