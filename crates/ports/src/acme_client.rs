//! ACME Client Port
//!
//! Defines the interface to the certificate authority.

use crate::remote_error::RemoteResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_broker_core::{AcmeAccount, AcmeOrder, Challenge};
use serde::{Deserialize, Serialize};

/// Private key and CSR for one issuance cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedKey {
    pub private_key_pem: String,
    pub csr_pem: String,
}

/// DNS-01 challenge as handed out by the CA
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSpec {
    pub domain: String,
    /// Record name relative to the customer's zone, e.g. `_acme-challenge.example.com`
    pub validation_domain: String,
    pub validation_contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub order: AcmeOrder,
    pub challenges: Vec<ChallengeSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub leaf_pem: String,
    pub fullchain_pem: String,
    pub expires_at: DateTime<Utc>,
}

/// Certificate authority port
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Register a new account with the CA
    async fn create_account(&self, email: &str) -> RemoteResult<AcmeAccount>;

    /// Generate a private key and a CSR covering `domains`
    async fn generate_private_key(&self, domains: &[String]) -> RemoteResult<GeneratedKey>;

    /// Open a new order and return its DNS-01 challenges
    async fn new_order(
        &self,
        account: &AcmeAccount,
        csr_pem: &str,
        domains: &[String],
    ) -> RemoteResult<NewOrder>;

    /// Tell the CA a challenge is ready; safe to repeat
    async fn answer_challenge(
        &self,
        account: &AcmeAccount,
        order: &AcmeOrder,
        challenge: &Challenge,
    ) -> RemoteResult<()>;

    /// Finalize the order; `OrderAlreadyValid` when it was finalized before
    async fn finalize_order(
        &self,
        account: &AcmeAccount,
        order: &AcmeOrder,
        csr_pem: &str,
    ) -> RemoteResult<IssuedCertificate>;
}
