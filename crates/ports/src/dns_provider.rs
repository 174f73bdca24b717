//! DNS Provider Port

use crate::remote_error::RemoteResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Record managed in the broker's hosted zone
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnsRecord {
    Txt {
        name: String,
        value: String,
    },
    Alias {
        name: String,
        target: String,
        hosted_zone_id: String,
    },
}

impl DnsRecord {
    pub fn name(&self) -> &str {
        match self {
            Self::Txt { name, .. } | Self::Alias { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeStatus {
    Pending,
    Insync,
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create or replace a record, returning the change id to wait on.
    /// Providers that reject duplicate creates report `AlreadyExists`.
    async fn upsert_record(&self, record: &DnsRecord) -> RemoteResult<String>;

    /// Delete a record; `NotFound` when it is already gone.
    async fn delete_record(&self, record: &DnsRecord) -> RemoteResult<()>;

    async fn change_status(&self, change_id: &str) -> RemoteResult<ChangeStatus>;
}

/// Resolves CNAME records on the public internet
#[async_trait]
pub trait CnameResolver: Send + Sync {
    /// Target of the CNAME at `name`, or `None` when there is no such record
    async fn resolve_cname(&self, name: &str) -> RemoteResult<Option<String>>;
}
