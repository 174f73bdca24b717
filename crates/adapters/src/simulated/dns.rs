//! Simulated DNS provider and CNAME resolver

use super::failures::FailurePlan;
use async_trait::async_trait;
use domain_broker_ports::{
    ChangeStatus, CnameResolver, DnsProvider, DnsRecord, RemoteError, RemoteResult,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct DnsState {
    records: BTreeMap<String, DnsRecord>,
    /// record name -> change that last wrote it
    last_change: HashMap<String, String>,
    /// change id -> status polls left before the change is in sync
    changes: HashMap<String, u32>,
}

/// Hosted zone kept in memory; changes go in sync after a number of polls
#[derive(Clone, Default)]
pub struct SimulatedDnsProvider {
    state: Arc<Mutex<DnsState>>,
    propagation_polls: u32,
    failures: FailurePlan,
}

impl SimulatedDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `change_status` calls that report `Pending` for each change
    pub fn with_propagation_polls(mut self, polls: u32) -> Self {
        self.propagation_polls = polls;
        self
    }

    pub fn failures(&self) -> &FailurePlan {
        &self.failures
    }

    pub async fn record(&self, name: &str) -> Option<DnsRecord> {
        self.state.lock().await.records.get(name).cloned()
    }

    pub async fn records(&self) -> Vec<DnsRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }
}

#[async_trait]
impl DnsProvider for SimulatedDnsProvider {
    async fn upsert_record(&self, record: &DnsRecord) -> RemoteResult<String> {
        self.failures.check("upsert_record")?;
        let mut state = self.state.lock().await;
        let name = record.name().to_string();
        // writing an identical record is a no-op change
        if state.records.get(&name) == Some(record) {
            if let Some(change_id) = state.last_change.get(&name) {
                return Ok(change_id.clone());
            }
        }
        state.records.insert(name.clone(), record.clone());
        let change_id = format!("/change/{}", Uuid::new_v4().simple());
        state
            .changes
            .insert(change_id.clone(), self.propagation_polls);
        state.last_change.insert(name, change_id.clone());
        Ok(change_id)
    }

    async fn delete_record(&self, record: &DnsRecord) -> RemoteResult<()> {
        self.failures.check("delete_record")?;
        let mut state = self.state.lock().await;
        state.last_change.remove(record.name());
        match state.records.remove(record.name()) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(record.name().to_string())),
        }
    }

    async fn change_status(&self, change_id: &str) -> RemoteResult<ChangeStatus> {
        self.failures.check("change_status")?;
        let mut state = self.state.lock().await;
        let remaining = state
            .changes
            .get_mut(change_id)
            .ok_or_else(|| RemoteError::NotFound(change_id.to_string()))?;
        if *remaining == 0 {
            Ok(ChangeStatus::Insync)
        } else {
            *remaining -= 1;
            Ok(ChangeStatus::Pending)
        }
    }
}

/// Fixed CNAME table standing in for public DNS
#[derive(Clone, Default)]
pub struct SimulatedCnameResolver {
    cnames: Arc<Mutex<HashMap<String, String>>>,
}

impl SimulatedCnameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_cname(&self, name: impl Into<String>, target: impl Into<String>) {
        self.cnames.lock().await.insert(name.into(), target.into());
    }
}

#[async_trait]
impl CnameResolver for SimulatedCnameResolver {
    async fn resolve_cname(&self, name: &str) -> RemoteResult<Option<String>> {
        Ok(self.cnames.lock().await.get(name).cloned())
    }
}
