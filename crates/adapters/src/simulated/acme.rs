//! Simulated ACME certificate authority

use super::failures::FailurePlan;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use domain_broker_core::{AcmeAccount, AcmeAccountId, AcmeOrder, AcmeOrderStatus, Challenge};
use domain_broker_ports::{
    AcmeClient, ChallengeSpec, GeneratedKey, IssuedCertificate, NewOrder, RemoteError,
    RemoteResult,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

struct OrderState {
    status: AcmeOrderStatus,
    domains: BTreeSet<String>,
    answered: BTreeSet<String>,
}

#[derive(Default)]
struct AcmeState {
    orders: HashMap<String, OrderState>,
    accounts_created: usize,
    certificates_issued: usize,
}

/// In-process certificate authority that validates nothing
#[derive(Clone)]
pub struct SimulatedAcmeClient {
    state: Arc<Mutex<AcmeState>>,
    validity: Duration,
    failures: FailurePlan,
}

impl SimulatedAcmeClient {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AcmeState::default())),
            validity: Duration::days(90),
            failures: FailurePlan::default(),
        }
    }

    /// Lifetime of issued certificates
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn failures(&self) -> &FailurePlan {
        &self.failures
    }

    pub async fn accounts_created(&self) -> usize {
        self.state.lock().await.accounts_created
    }

    pub async fn certificates_issued(&self) -> usize {
        self.state.lock().await.certificates_issued
    }

    pub async fn orders_created(&self) -> usize {
        self.state.lock().await.orders.len()
    }
}

impl Default for SimulatedAcmeClient {
    fn default() -> Self {
        Self::new()
    }
}

fn pem(label: &str, body: &str) -> String {
    format!("-----BEGIN {label}-----\n{body}\n-----END {label}-----\n")
}

#[async_trait]
impl AcmeClient for SimulatedAcmeClient {
    async fn create_account(&self, email: &str) -> RemoteResult<AcmeAccount> {
        self.failures.check("create_account")?;
        let mut state = self.state.lock().await;
        state.accounts_created += 1;
        let id = AcmeAccountId::new();
        Ok(AcmeAccount {
            id,
            email: email.to_string(),
            uri: format!("https://acme.simulated/acct/{}", id),
            private_key_pem: pem("EC PRIVATE KEY", &Uuid::new_v4().to_string()),
            registration_json: serde_json::json!({
                "status": "valid",
                "contact": [format!("mailto:{}", email)],
            }),
            created_at: Utc::now(),
        })
    }

    async fn generate_private_key(&self, domains: &[String]) -> RemoteResult<GeneratedKey> {
        self.failures.check("generate_private_key")?;
        Ok(GeneratedKey {
            private_key_pem: pem("PRIVATE KEY", &Uuid::new_v4().to_string()),
            csr_pem: pem("CERTIFICATE REQUEST", &domains.join(",")),
        })
    }

    async fn new_order(
        &self,
        _account: &AcmeAccount,
        _csr_pem: &str,
        domains: &[String],
    ) -> RemoteResult<NewOrder> {
        self.failures.check("new_order")?;
        let uri = format!("https://acme.simulated/order/{}", Uuid::new_v4());
        let challenges = domains
            .iter()
            .map(|domain| ChallengeSpec {
                domain: domain.clone(),
                validation_domain: format!("_acme-challenge.{}", domain),
                validation_contents: Uuid::new_v4().simple().to_string(),
            })
            .collect();

        self.state.lock().await.orders.insert(
            uri.clone(),
            OrderState {
                status: AcmeOrderStatus::Pending,
                domains: domains.iter().cloned().collect(),
                answered: BTreeSet::new(),
            },
        );
        debug!(order = %uri, "Simulated ACME order created");

        Ok(NewOrder {
            order: AcmeOrder {
                uri,
                status: AcmeOrderStatus::Pending,
                expires_at: Utc::now() + Duration::days(7),
            },
            challenges,
        })
    }

    async fn answer_challenge(
        &self,
        _account: &AcmeAccount,
        order: &AcmeOrder,
        challenge: &Challenge,
    ) -> RemoteResult<()> {
        self.failures.check("answer_challenge")?;
        let mut state = self.state.lock().await;
        let order_state = state
            .orders
            .get_mut(&order.uri)
            .ok_or_else(|| RemoteError::NotFound(order.uri.clone()))?;
        order_state.answered.insert(challenge.domain.clone());
        if order_state.status == AcmeOrderStatus::Pending
            && order_state.answered.is_superset(&order_state.domains)
        {
            order_state.status = AcmeOrderStatus::Ready;
        }
        Ok(())
    }

    async fn finalize_order(
        &self,
        _account: &AcmeAccount,
        order: &AcmeOrder,
        csr_pem: &str,
    ) -> RemoteResult<IssuedCertificate> {
        self.failures.check("finalize_order")?;
        let mut state = self.state.lock().await;
        let order_state = state
            .orders
            .get_mut(&order.uri)
            .ok_or_else(|| RemoteError::NotFound(order.uri.clone()))?;
        match order_state.status {
            AcmeOrderStatus::Valid => return Err(RemoteError::OrderAlreadyValid),
            AcmeOrderStatus::Ready => {}
            status => {
                return Err(RemoteError::Transient(format!(
                    "order {} is {}",
                    order.uri,
                    status.as_str()
                )));
            }
        }
        order_state.status = AcmeOrderStatus::Valid;
        state.certificates_issued += 1;

        let leaf_pem = pem("CERTIFICATE", csr_pem.trim());
        Ok(IssuedCertificate {
            fullchain_pem: format!("{}{}", leaf_pem, pem("CERTIFICATE", "simulated-intermediate")),
            leaf_pem,
            expires_at: Utc::now() + self.validity,
        })
    }
}
