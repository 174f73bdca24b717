//! Periodic scanners
//!
//! The stall scanner restarts operations whose chain stopped making progress
//! (lost task, crashed worker); the renewal scanner opens renew operations for
//! certificates close to expiry. Both only enqueue head-of-chain tasks and
//! rely on step idempotency for everything else.

use crate::error::Result;
use crate::settings::ScannerSettings;
use domain_broker_core::{
    Action, CorrelationId, DateTime, NewOperation, OperationId, PipelineBuilder, Utc,
};
use domain_broker_ports::{EntityStore, TaskQueue};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct StalledOperationScanner {
    store: Arc<dyn EntityStore>,
    queue: Arc<dyn TaskQueue>,
    stall_threshold: chrono::Duration,
}

impl StalledOperationScanner {
    pub fn new(
        store: Arc<dyn EntityStore>,
        queue: Arc<dyn TaskQueue>,
        stall_threshold: chrono::Duration,
    ) -> Self {
        Self {
            store,
            queue,
            stall_threshold,
        }
    }

    /// Re-enqueue the head of the chain of every stalled operation and return
    /// the ids that were restarted.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<Vec<OperationId>> {
        let cutoff = now - self.stall_threshold;
        let mut restarted = Vec::new();

        for operation in self.store.find_stale_operations(cutoff).await? {
            let Some(instance) = self.store.get_instance(&operation.instance_id).await? else {
                warn!(
                    "Stalled operation {} refers to missing instance {}",
                    operation.id, operation.instance_id
                );
                continue;
            };

            let pipeline = PipelineBuilder::chain(instance.resource_kind(), operation.action);
            let task = pipeline.first_task(operation.id, CorrelationId::recovered())?;
            self.queue.enqueue(task).await?;

            // fresh heartbeat so the next scan leaves the restarted chain alone
            self.store.touch_operation(operation.id).await?;

            info!(
                "Restarted stalled {} operation {} of instance {}",
                operation.action, operation.id, operation.instance_id
            );
            restarted.push(operation.id);
        }
        Ok(restarted)
    }
}

pub struct RenewalScanner {
    store: Arc<dyn EntityStore>,
    queue: Arc<dyn TaskQueue>,
    renewal_lead: chrono::Duration,
}

impl RenewalScanner {
    pub fn new(
        store: Arc<dyn EntityStore>,
        queue: Arc<dyn TaskQueue>,
        renewal_lead: chrono::Duration,
    ) -> Self {
        Self {
            store,
            queue,
            renewal_lead,
        }
    }

    /// Open a renew operation for every active instance whose certificate
    /// expires within the lead window and which has no open operation.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<Vec<OperationId>> {
        let mut created = Vec::new();

        for instance in self
            .store
            .find_expiring_instances(now + self.renewal_lead)
            .await?
        {
            let operations = self.store.operations_for_instance(&instance.id).await?;
            if let Some(open) = operations.iter().find(|operation| operation.is_open()) {
                info!(
                    "Skipping renewal of instance {}: {} operation {} still open",
                    instance.id, open.action, open.id
                );
                continue;
            }

            let operation = self
                .store
                .create_operation(NewOperation::new(instance.id.clone(), Action::Renew))
                .await?;
            let pipeline = PipelineBuilder::chain(instance.resource_kind(), Action::Renew);
            self.queue
                .enqueue(pipeline.first_task(operation.id, CorrelationId::renewal())?)
                .await?;

            info!(
                "Renewal operation {} opened for instance {} (expires {:?})",
                operation.id,
                instance.id,
                instance.cert_expires_at()
            );
            created.push(operation.id);
        }
        Ok(created)
    }
}

/// Drives both scanners on a fixed interval until shutdown
pub struct ScanScheduler {
    stalled: StalledOperationScanner,
    renewal: RenewalScanner,
    settings: ScannerSettings,
}

impl ScanScheduler {
    pub fn new(
        store: Arc<dyn EntityStore>,
        queue: Arc<dyn TaskQueue>,
        settings: ScannerSettings,
    ) -> Self {
        Self {
            stalled: StalledOperationScanner::new(
                store.clone(),
                queue.clone(),
                settings.stall_threshold,
            ),
            renewal: RenewalScanner::new(store, queue, settings.renewal_lead),
            settings,
        }
    }

    /// One pass of both scanners; failures are logged, not propagated
    pub async fn tick(&self, now: DateTime<Utc>) {
        match self.stalled.scan(now).await {
            Ok(restarted) if !restarted.is_empty() => {
                info!("Restarted {} stalled operations", restarted.len())
            }
            Ok(_) => {}
            Err(e) => error!("Stall scan failed: {}", e),
        }
        match self.renewal.scan(now).await {
            Ok(created) if !created.is_empty() => {
                info!("Opened {} renewal operations", created.len())
            }
            Ok(_) => {}
            Err(e) => error!("Renewal scan failed: {}", e),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Scanners running every {:?} (stall threshold {}, renewal lead {} days)",
            self.settings.interval,
            self.settings.stall_threshold,
            self.settings.renewal_lead.num_days()
        );
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => self.tick(Utc::now()).await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Scanners stopped");
    }
}
