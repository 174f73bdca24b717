//! DNS steps: validation TXT records, ALIAS records and change propagation

use super::{StepRunner, StepScope, absorb_not_found};
use crate::error::StepError;
use domain_broker_ports::{ChangeStatus, DnsRecord, RemoteError};
use tracing::{debug, info, warn};

impl StepRunner {
    fn validation_record(&self, validation_domain: &str, contents: &str) -> DnsRecord {
        DnsRecord::Txt {
            name: format!("{}.{}", validation_domain, self.settings.root_domain),
            value: contents.to_string(),
        }
    }

    fn alias_record(&self, domain: &str, target: &str, hosted_zone_id: &str) -> DnsRecord {
        DnsRecord::Alias {
            name: format!("{}.{}", domain, self.settings.root_domain),
            target: target.to_string(),
            hosted_zone_id: hosted_zone_id.to_string(),
        }
    }

    /// Upsert a record and remember its change id for `wait-for-dns-changes`
    async fn publish_record(
        &self,
        scope: &mut StepScope,
        record: &DnsRecord,
    ) -> Result<(), StepError> {
        match self.collaborators.dns.upsert_record(record).await {
            Ok(change_id) => {
                if !scope.instance.dns_change_ids.contains(&change_id) {
                    scope.instance.dns_change_ids.push(change_id);
                }
                Ok(())
            }
            Err(RemoteError::AlreadyExists(name)) => {
                debug!("DNS record {} already published", name);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub(super) async fn publish_validation_records(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Updating DNS TXT records").await?;

        let records: Vec<DnsRecord> = scope
            .instance
            .pending_challenges()
            .into_iter()
            .map(|challenge| {
                self.validation_record(&challenge.validation_domain, &challenge.validation_contents)
            })
            .collect();
        for record in &records {
            self.publish_record(scope, record).await?;
        }
        self.commit(scope).await
    }

    pub(super) async fn wait_for_dns_changes(&self, scope: &mut StepScope) -> Result<(), StepError> {
        self.describe(scope, "Waiting for DNS changes").await?;

        let policy = self.settings.dns_poll;
        for attempt in 1..=policy.max_attempts {
            let mut pending = Vec::new();
            for change_id in &scope.instance.dns_change_ids {
                match self.collaborators.dns.change_status(change_id).await {
                    Ok(ChangeStatus::Insync) => {}
                    // the provider forgets changes once they are long applied
                    Err(RemoteError::NotFound(_)) => {}
                    Ok(ChangeStatus::Pending) => pending.push(change_id.clone()),
                    Err(err) => return Err(err.into()),
                }
            }

            if pending.len() != scope.instance.dns_change_ids.len() {
                scope.instance.dns_change_ids = pending;
                self.commit(scope).await?;
            }
            if scope.instance.dns_change_ids.is_empty() {
                return Ok(());
            }

            debug!(
                "{} DNS changes still pending (poll {}/{})",
                scope.instance.dns_change_ids.len(),
                attempt,
                policy.max_attempts
            );
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(StepError::transient(format!(
            "{} DNS changes still pending after {} polls",
            scope.instance.dns_change_ids.len(),
            policy.max_attempts
        )))
    }

    pub(super) async fn publish_alias_records(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Creating DNS ALIAS records").await?;

        let (Some(target), Some(hosted_zone_id)) = (
            scope.instance.alias_target.clone(),
            scope.instance.alias_hosted_zone.clone(),
        ) else {
            return Err(StepError::fatal(format!(
                "instance {} has no alias target",
                scope.instance.id
            )));
        };

        let missing: Vec<String> = scope
            .instance
            .domain_names
            .iter()
            .filter(|domain| !scope.instance.alias_records.contains(domain))
            .cloned()
            .collect();
        for domain in missing {
            let record = self.alias_record(&domain, &target, &hosted_zone_id);
            self.publish_record(scope, &record).await?;
            scope.instance.alias_records.push(domain);
        }
        self.commit(scope).await
    }

    pub(super) async fn remove_alias_records(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Removing DNS ALIAS records").await?;

        let target = scope.instance.alias_target.clone().unwrap_or_default();
        let hosted_zone_id = scope.instance.alias_hosted_zone.clone().unwrap_or_default();
        let mut failures = Vec::new();
        for domain in scope.instance.domain_names.clone() {
            let record = self.alias_record(&domain, &target, &hosted_zone_id);
            if let Err(err) = absorb_not_found(self.collaborators.dns.delete_record(&record).await) {
                warn!("Could not remove ALIAS record {}: {}", record.name(), err);
                failures.push(record.name().to_string());
            }
        }

        scope.instance.alias_records.clear();
        self.commit(scope).await?;
        if failures.is_empty() {
            info!("Removed ALIAS records of instance {}", scope.instance.id);
            Ok(())
        } else {
            Err(StepError::transient(format!(
                "ALIAS records not removed: {}",
                failures.join(", ")
            )))
        }
    }

    pub(super) async fn remove_validation_records(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Removing DNS TXT records").await?;

        let records: Vec<DnsRecord> = scope
            .instance
            .challenges
            .iter()
            .map(|challenge| {
                self.validation_record(&challenge.validation_domain, &challenge.validation_contents)
            })
            .collect();
        let mut failures = Vec::new();
        for record in &records {
            if let Err(err) = absorb_not_found(self.collaborators.dns.delete_record(record).await) {
                warn!("Could not remove TXT record {}: {}", record.name(), err);
                failures.push(record.name().to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StepError::transient(format!(
                "TXT records not removed: {}",
                failures.join(", ")
            )))
        }
    }
}
