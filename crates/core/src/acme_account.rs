//! ACME account registered with the certificate authority

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// ACME account identifier - Value Object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcmeAccountId(Uuid);

impl AcmeAccountId {
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

impl Default for AcmeAccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AcmeAccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcmeAccount {
    pub id: AcmeAccountId,
    pub email: String,
    pub uri: String,
    pub private_key_pem: String,
    pub registration_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
