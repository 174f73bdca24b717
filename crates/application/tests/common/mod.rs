//! Shared harness: in-memory store and queue, simulated remotes, fast polling

#![allow(dead_code)]

use domain_broker_adapters::{
    InMemoryEntityStore, InMemoryTaskQueue, SimulatedAcmeClient, SimulatedCdn,
    SimulatedCertificateStore, SimulatedCnameResolver, SimulatedDnsProvider,
    SimulatedLoadBalancers,
};
use domain_broker_application::{
    Collaborators, OperationParameters, OperationService, PipelineSettings, PollPolicy,
    RetryPolicy, StepExecutor, StepOutcome, StepRunner, StepScope, WorkerPool, WorkerPoolConfig,
};
use domain_broker_core::{
    Action, InstanceId, Operation, OperationId, ResourceKind, ServiceInstance, StepId,
};
use domain_broker_ports::{EntityStore, TaskQueue};
use std::sync::Arc;
use std::time::Duration;

pub const ROOT_DOMAIN: &str = "domains.test";
pub const LB_A: &str = "arn:aws:elasticloadbalancing:us-east-1:000000000000:loadbalancer/app/broker-a";
pub const LB_B: &str = "arn:aws:elasticloadbalancing:us-east-1:000000000000:loadbalancer/app/broker-b";

pub struct Harness {
    pub store: InMemoryEntityStore,
    pub queue: InMemoryTaskQueue,
    pub acme: SimulatedAcmeClient,
    pub dns: SimulatedDnsProvider,
    pub resolver: SimulatedCnameResolver,
    pub certificates: SimulatedCertificateStore,
    pub load_balancers: SimulatedLoadBalancers,
    pub cdn: SimulatedCdn,
    pub runner: StepRunner,
    pub executor: Arc<StepExecutor>,
    pub pool: WorkerPool,
    pub service: OperationService,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_retry(RetryPolicy::default()).await
    }

    pub async fn with_retry(retry: RetryPolicy) -> Self {
        let store = InMemoryEntityStore::new();
        let queue = InMemoryTaskQueue::default();
        queue.open().await.unwrap();

        let acme = SimulatedAcmeClient::new();
        let dns = SimulatedDnsProvider::new().with_propagation_polls(1);
        let resolver = SimulatedCnameResolver::new();
        let certificates = SimulatedCertificateStore::new();
        let load_balancers = SimulatedLoadBalancers::new([LB_A, LB_B]);
        let cdn = SimulatedCdn::new().with_deploy_polls(1);

        let store_port: Arc<dyn EntityStore> = Arc::new(store.clone());
        let queue_port: Arc<dyn TaskQueue> = Arc::new(queue.clone());

        let collaborators = Collaborators {
            store: store_port.clone(),
            acme: Arc::new(acme.clone()),
            dns: Arc::new(dns.clone()),
            certificates: Arc::new(certificates.clone()),
            load_balancers: Arc::new(load_balancers.clone()),
            cdn: Arc::new(cdn.clone()),
        };
        let settings = PipelineSettings {
            root_domain: ROOT_DOMAIN.to_string(),
            dns_poll: PollPolicy::new(Duration::from_millis(1), 5),
            distribution_poll: PollPolicy::new(Duration::from_millis(1), 5),
            ..PipelineSettings::default()
        };
        let runner = StepRunner::new(collaborators, settings);
        let executor = Arc::new(StepExecutor::new(
            store_port.clone(),
            queue_port.clone(),
            runner.clone(),
            retry,
        ));
        let pool = WorkerPool::new(
            executor.clone(),
            queue_port.clone(),
            WorkerPoolConfig::default(),
        );
        let service = OperationService::new(
            store_port,
            queue_port,
            Arc::new(resolver.clone()),
            ROOT_DOMAIN,
        );

        Self {
            store,
            queue,
            acme,
            dns,
            resolver,
            certificates,
            load_balancers,
            cdn,
            runner,
            executor,
            pool,
            service,
        }
    }

    pub fn store_port(&self) -> Arc<dyn EntityStore> {
        Arc::new(self.store.clone())
    }

    pub fn queue_port(&self) -> Arc<dyn TaskQueue> {
        Arc::new(self.queue.clone())
    }

    /// Publish the CNAMEs a customer has to create before provisioning
    pub async fn delegate(&self, domains: &[&str]) {
        for domain in domains {
            self.resolver
                .set_cname(
                    format!("_acme-challenge.{}", domain),
                    format!("_acme-challenge.{}.{}.", domain, ROOT_DOMAIN),
                )
                .await;
        }
    }

    pub async fn provision(&self, id: &str, kind: ResourceKind, domains: &[&str]) -> OperationId {
        self.delegate(domains).await;
        let parameters = OperationParameters {
            kind: Some(kind),
            domains: Some(domains.join(",")),
            origin: (kind == ResourceKind::Cdn).then(|| "origin.example.org".to_string()),
            ..OperationParameters::default()
        };
        self.service
            .start_operation(&InstanceId::new(id), Action::Provision, parameters)
            .await
            .unwrap()
    }

    pub async fn start(&self, id: &str, action: Action) -> OperationId {
        self.service
            .start_operation(&InstanceId::new(id), action, OperationParameters::default())
            .await
            .unwrap()
    }

    /// Handle one visible delivery, acking it like the worker pool does
    pub async fn step_once(&self) -> Option<StepOutcome> {
        let delivery = self.queue.dequeue().await.unwrap()?;
        let outcome = self.executor.execute(delivery.task.clone()).await.unwrap();
        self.queue.ack(&delivery).await.unwrap();
        Some(outcome)
    }

    pub async fn run_until_idle(&self) -> usize {
        self.pool.process_available().await
    }

    /// Make retries visible immediately and keep going until nothing is left
    pub async fn run_with_retries(&self, rounds: usize) {
        for _ in 0..rounds {
            self.run_until_idle().await;
            if self.queue.pending_tasks().await.is_empty() {
                return;
            }
            self.queue.release_scheduled().await;
        }
    }

    pub async fn operation(&self, id: OperationId) -> Operation {
        self.store.get_operation(id).await.unwrap().unwrap()
    }

    pub async fn instance(&self, id: &str) -> ServiceInstance {
        self.store
            .get_instance(&InstanceId::new(id))
            .await
            .unwrap()
            .unwrap()
    }

    /// Run one catalogue step directly against freshly loaded state
    pub async fn run_step(&self, step: StepId, operation_id: OperationId) {
        let operation = self.operation(operation_id).await;
        let instance = self
            .store
            .get_instance(&operation.instance_id)
            .await
            .unwrap()
            .unwrap();
        let mut scope = StepScope::new(operation, instance);
        self.runner
            .run(step, &mut scope)
            .await
            .unwrap_or_else(|e| panic!("step {} failed: {}", step, e));
    }
}

/// Instance as persisted, minus the store-managed timestamp
pub fn snapshot(mut instance: ServiceInstance) -> ServiceInstance {
    instance.updated_at = instance.created_at;
    instance
}
