//! Certificate issuance steps: ACME account, key, order, answers, upload

use super::{StepRunner, StepScope, issuing, new_certificate, new_certificate_mut};
use crate::error::StepError;
use chrono::Duration;
use domain_broker_core::{AcmeOrderStatus, Certificate, Challenge, InstanceKind, Utc};
use domain_broker_ports::{CertificateUpload, RemoteError};
use tracing::{info, warn};

/// A finalize reporting an already valid order is only trusted when the
/// certificate we hold is good for at least this long.
const ALREADY_VALID_MIN_REMAINING_DAYS: i64 = 31;

impl StepRunner {
    pub(super) async fn create_acme_account(&self, scope: &mut StepScope) -> Result<(), StepError> {
        self.describe(scope, "Registering user for Let's Encrypt").await?;

        if let Some(account_id) = scope.instance.acme_account_id
            && self
                .collaborators
                .store
                .get_acme_account(account_id)
                .await?
                .is_some()
        {
            return Ok(());
        }

        let account = self
            .collaborators
            .acme
            .create_account(&self.settings.acme_contact_email)
            .await?;
        self.collaborators.store.save_acme_account(&account).await?;
        info!(
            "Registered ACME account {} for instance {}",
            account.id, scope.instance.id
        );

        scope.instance.acme_account_id = Some(account.id);
        self.commit(scope).await
    }

    pub(super) async fn generate_private_key(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Creating credentials for Lets Encrypt").await?;

        let operation_id = scope.operation.id;
        let already_promoted = scope
            .instance
            .current_certificate
            .as_ref()
            .is_some_and(|certificate| certificate.issued_for == Some(operation_id));
        if already_promoted {
            return Ok(());
        }
        if let Some(certificate) = scope.instance.new_certificate.as_mut()
            && certificate.has_private_key()
        {
            // left behind by an earlier operation: adopt it
            if certificate.issued_for != Some(operation_id) {
                certificate.issued_for = Some(operation_id);
                self.commit(scope).await?;
            }
            return Ok(());
        }

        let key = self
            .collaborators
            .acme
            .generate_private_key(&scope.instance.domain_names)
            .await?;
        let certificate = scope
            .instance
            .new_certificate
            .get_or_insert_with(Certificate::new);
        certificate.private_key_pem = Some(key.private_key_pem);
        certificate.csr_pem = Some(key.csr_pem);
        certificate.issued_for = Some(operation_id);
        self.commit(scope).await
    }

    pub(super) async fn initiate_challenges(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Initiating Lets Encrypt challenges").await?;

        let Some(certificate) = issuing(scope) else {
            return Ok(());
        };
        if certificate
            .order
            .as_ref()
            .is_some_and(|order| order.is_reusable(Utc::now()))
        {
            return Ok(());
        }
        let certificate_id = certificate.id;
        let csr_pem = certificate
            .csr_pem
            .clone()
            .ok_or_else(|| StepError::fatal("certificate in issuance has no CSR"))?;

        let account = self.acme_account(&scope.instance).await?;
        let new_order = self
            .collaborators
            .acme
            .new_order(&account, &csr_pem, &scope.instance.domain_names)
            .await?;

        // challenges of an abandoned order are never answered
        scope
            .instance
            .challenges
            .retain(|challenge| challenge.certificate_id != certificate_id);
        scope
            .instance
            .challenges
            .extend(new_order.challenges.into_iter().map(|spec| Challenge {
                certificate_id,
                domain: spec.domain,
                validation_domain: spec.validation_domain,
                validation_contents: spec.validation_contents,
                answered: false,
            }));
        new_certificate_mut(&mut scope.instance)?.order = Some(new_order.order);
        self.commit(scope).await
    }

    pub(super) async fn answer_challenges(&self, scope: &mut StepScope) -> Result<(), StepError> {
        self.describe(scope, "Answering Lets Encrypt challenges").await?;

        let Some(certificate) = issuing(scope) else {
            return Ok(());
        };
        let certificate_id = certificate.id;
        let order = certificate
            .order
            .clone()
            .ok_or_else(|| StepError::fatal("certificate in issuance has no ACME order"))?;
        let account = self.acme_account(&scope.instance).await?;

        for index in 0..scope.instance.challenges.len() {
            let challenge = &scope.instance.challenges[index];
            if challenge.certificate_id != certificate_id || challenge.answered {
                continue;
            }
            self.collaborators
                .acme
                .answer_challenge(&account, &order, challenge)
                .await?;
            scope.instance.challenges[index].answered = true;
            self.commit(scope).await?;
        }
        Ok(())
    }

    pub(super) async fn retrieve_certificate(
        &self,
        scope: &mut StepScope,
    ) -> Result<(), StepError> {
        self.describe(scope, "Retrieving SSL certificate from Lets Encrypt")
            .await?;

        let Some(certificate) = issuing(scope) else {
            return Ok(());
        };
        let order = certificate
            .order
            .clone()
            .ok_or_else(|| StepError::fatal("certificate in issuance has no ACME order"))?;
        let csr_pem = certificate
            .csr_pem
            .clone()
            .ok_or_else(|| StepError::fatal("certificate in issuance has no CSR"))?;
        let account = self.acme_account(&scope.instance).await?;

        match self
            .collaborators
            .acme
            .finalize_order(&account, &order, &csr_pem)
            .await
        {
            Ok(issued) => {
                let certificate = new_certificate_mut(&mut scope.instance)?;
                certificate.leaf_pem = Some(issued.leaf_pem);
                certificate.fullchain_pem = Some(issued.fullchain_pem);
                certificate.expires_at = Some(issued.expires_at);
                if let Some(order) = certificate.order.as_mut() {
                    order.status = AcmeOrderStatus::Valid;
                }
                self.commit(scope).await
            }
            Err(RemoteError::OrderAlreadyValid) => {
                let still_valid_until = Utc::now() + Duration::days(ALREADY_VALID_MIN_REMAINING_DAYS);
                let certificate = new_certificate(&scope.instance)?;
                if certificate.leaf_pem.is_some()
                    && certificate
                        .expires_at
                        .is_some_and(|expires_at| expires_at > still_valid_until)
                {
                    info!(
                        "Order {} already finalized, keeping stored certificate",
                        order.uri
                    );
                    Ok(())
                } else {
                    warn!(
                        "Order {} already finalized but no usable certificate is stored",
                        order.uri
                    );
                    Err(StepError::transient(format!(
                        "order {} is already valid but the certificate was not retrieved",
                        order.uri
                    )))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    pub(super) async fn upload_certificate(&self, scope: &mut StepScope) -> Result<(), StepError> {
        self.describe(scope, "Uploading SSL certificate to AWS").await?;

        let Some(certificate) = issuing(scope) else {
            return Ok(());
        };
        if certificate.stored.is_some() {
            return Ok(());
        }
        let (Some(private_key_pem), Some(leaf_pem), Some(fullchain_pem)) = (
            certificate.private_key_pem.clone(),
            certificate.leaf_pem.clone(),
            certificate.fullchain_pem.clone(),
        ) else {
            return Err(StepError::fatal(
                "certificate in issuance has not been retrieved",
            ));
        };

        let name = format!(
            "{}-{}-{}",
            scope.instance.id,
            Utc::now().format("%Y-%m-%d"),
            certificate.id
        );
        let path = match scope.instance.kind {
            InstanceKind::Routing(_) => self.settings.routing_certificate_path.clone(),
            InstanceKind::Cdn(_) => self.settings.cdn_certificate_path.clone(),
        };
        let upload = CertificateUpload {
            path,
            name: name.clone(),
            private_key_pem,
            chain_pem: chain_of(&leaf_pem, &fullchain_pem),
            leaf_pem,
        };

        let stored = match self
            .collaborators
            .certificates
            .upload_certificate(&upload)
            .await
        {
            Ok(stored) => stored,
            Err(RemoteError::AlreadyExists(_)) => self
                .collaborators
                .certificates
                .get_certificate(&name)
                .await?
                .ok_or_else(|| {
                    StepError::transient(format!(
                        "certificate {} reported as existing but cannot be found",
                        name
                    ))
                })?,
            Err(err) => return Err(err.into()),
        };
        info!("Uploaded certificate {} as {}", name, stored.arn);

        new_certificate_mut(&mut scope.instance)?.stored = Some(stored);
        self.commit(scope).await
    }
}

/// Intermediate certificates: the full chain minus the leaf
fn chain_of(leaf_pem: &str, fullchain_pem: &str) -> String {
    fullchain_pem
        .strip_prefix(leaf_pem)
        .unwrap_or(fullchain_pem)
        .trim_start()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::chain_of;

    #[test]
    fn test_chain_strips_leading_leaf() {
        let leaf = "-----BEGIN CERTIFICATE-----\nleaf\n-----END CERTIFICATE-----\n";
        let intermediate = "-----BEGIN CERTIFICATE-----\nca\n-----END CERTIFICATE-----\n";
        let fullchain = format!("{}{}", leaf, intermediate);
        assert_eq!(chain_of(leaf, &fullchain), intermediate);
    }

    #[test]
    fn test_chain_without_leaf_prefix_is_kept() {
        assert_eq!(chain_of("leaf", "ca"), "ca");
    }
}
