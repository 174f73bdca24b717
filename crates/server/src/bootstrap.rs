//! Server Bootstrap
//!
//! Builds a running broker out of a validated [`AppConfig`]: storage
//! backends, remote collaborators, the step executor, the worker pool and the
//! scanners.

use domain_broker_adapters::config::{AppConfig, Backend, ConfigError};
use domain_broker_adapters::{
    InMemoryEntityStore, InMemoryTaskQueue, PostgresEntityStore, PostgresTaskQueue,
    SimulatedAcmeClient, SimulatedCdn, SimulatedCertificateStore, SimulatedCnameResolver,
    SimulatedDnsProvider, SimulatedLoadBalancers,
};
use domain_broker_application::{
    Collaborators, OperationService, PipelineSettings, PollPolicy, RetryPolicy, ScanScheduler,
    ScannerSettings, StepExecutor, StepRunner, WorkerPool, WorkerPoolConfig,
};
use domain_broker_ports::{EntityStore, QueueError, TaskQueue};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Task queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, BootstrapError>;

/// In-process stand-ins for the ACME CA, DNS and cloud APIs.
///
/// The handles are clones of what the pipeline uses, so a caller can prepare
/// state (customer CNAMEs, preloaded listeners) or inspect results.
#[derive(Clone)]
pub struct SimulatedRemotes {
    pub acme: SimulatedAcmeClient,
    pub dns: SimulatedDnsProvider,
    pub resolver: SimulatedCnameResolver,
    pub certificates: SimulatedCertificateStore,
    pub load_balancers: SimulatedLoadBalancers,
    pub cdn: SimulatedCdn,
}

impl SimulatedRemotes {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            acme: SimulatedAcmeClient::new(),
            dns: SimulatedDnsProvider::new(),
            resolver: SimulatedCnameResolver::new(),
            certificates: SimulatedCertificateStore::new(),
            load_balancers: SimulatedLoadBalancers::new(
                config.routing.load_balancer_arns.iter().cloned(),
            ),
            cdn: SimulatedCdn::new(),
        }
    }

    fn collaborators(&self, store: Arc<dyn EntityStore>) -> Collaborators {
        Collaborators {
            store,
            acme: Arc::new(self.acme.clone()),
            dns: Arc::new(self.dns.clone()),
            certificates: Arc::new(self.certificates.clone()),
            load_balancers: Arc::new(self.load_balancers.clone()),
            cdn: Arc::new(self.cdn.clone()),
        }
    }
}

/// Everything a broker process runs
pub struct BrokerRuntime {
    pub config: AppConfig,
    pub store: Arc<dyn EntityStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub remotes: SimulatedRemotes,
    pub service: Arc<OperationService>,
    pub pool: WorkerPool,
    pub scheduler: ScanScheduler,
}

impl BrokerRuntime {
    /// Run workers and scanners until `shutdown` resolves, then let in-flight
    /// steps finish and close the queue.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handles = self.pool.spawn(shutdown_rx.clone());
        let scheduler = self.scheduler;
        handles.push(tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        }));
        info!("Domain broker running");

        shutdown.await;
        info!("Shutdown requested, waiting for in-flight steps");
        if shutdown_tx.send(true).is_err() {
            debug!("All background tasks already stopped");
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Background task ended abnormally: {}", e);
            }
        }

        self.queue.close().await?;
        info!("Domain broker stopped");
        Ok(())
    }
}

pub async fn initialize(config: AppConfig) -> Result<BrokerRuntime> {
    info!("Initializing domain broker");
    config.validate()?;

    let (store, queue) = storage(&config).await?;
    queue.open().await?;
    info!("Task queue opened ({:?} backend)", config.queue.backend);

    let remotes = SimulatedRemotes::new(&config);
    warn!("Remote collaborators are simulated in-process; issued certificates are not trusted");

    let runner = StepRunner::new(remotes.collaborators(store.clone()), pipeline_settings(&config));
    let retry = RetryPolicy {
        retry_delay: config.retry.retry_delay(),
        max_attempts: config.retry.max_attempts,
    };
    let executor = Arc::new(StepExecutor::new(
        store.clone(),
        queue.clone(),
        runner,
        retry,
    ));
    let pool = WorkerPool::new(
        executor,
        queue.clone(),
        WorkerPoolConfig {
            concurrency: config.worker.concurrency,
            poll_interval: config.queue.poll_interval(),
        },
    );
    let scheduler = ScanScheduler::new(store.clone(), queue.clone(), scanner_settings(&config));
    let service = Arc::new(OperationService::new(
        store.clone(),
        queue.clone(),
        Arc::new(remotes.resolver.clone()),
        config.dns.root_domain.clone(),
    ));

    info!("Domain broker initialized");
    Ok(BrokerRuntime {
        config,
        store,
        queue,
        remotes,
        service,
        pool,
        scheduler,
    })
}

async fn storage(config: &AppConfig) -> Result<(Arc<dyn EntityStore>, Arc<dyn TaskQueue>)> {
    let pool = match config.database.backend {
        Backend::Memory => None,
        Backend::Postgres => Some(connect(config).await?),
    };

    let store: Arc<dyn EntityStore> = match &pool {
        None => Arc::new(InMemoryEntityStore::new()),
        Some(pool) => {
            let store = PostgresEntityStore::new(pool.clone());
            store.init_schema().await.map_err(|e| {
                BootstrapError::Database(format!("Failed to initialize entity store schema: {}", e))
            })?;
            Arc::new(store)
        }
    };

    let queue: Arc<dyn TaskQueue> = match (config.queue.backend, pool) {
        (Backend::Postgres, Some(pool)) => Arc::new(PostgresTaskQueue::new(
            pool,
            config.queue.visibility_timeout(),
        )),
        (Backend::Postgres, None) => {
            return Err(ConfigError::InvalidValue(
                "the postgres queue requires the postgres database backend".to_string(),
            )
            .into());
        }
        (Backend::Memory, _) => Arc::new(InMemoryTaskQueue::new(config.queue.visibility_timeout())),
    };

    Ok((store, queue))
}

async fn connect(config: &AppConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.connection_timeout())
        .connect(&config.database.url)
        .await
        .map_err(|e| {
            error!("Failed to connect to PostgreSQL: {}", e);
            BootstrapError::Database(format!("Failed to connect to PostgreSQL: {}", e))
        })?;
    info!("PostgreSQL connection pool initialized");
    Ok(pool)
}

fn pipeline_settings(config: &AppConfig) -> PipelineSettings {
    PipelineSettings {
        root_domain: config.dns.root_domain.clone(),
        acme_contact_email: config.acme.contact_email.clone(),
        routing_certificate_path: config.certificates.routing_path.clone(),
        cdn_certificate_path: config.certificates.cdn_path.clone(),
        load_balancer_arns: config.routing.load_balancer_arns.clone(),
        dns_poll: PollPolicy::new(
            Duration::from_millis(config.polling.dns_poll_interval_ms),
            config.polling.dns_max_attempts,
        ),
        distribution_poll: PollPolicy::new(
            Duration::from_millis(config.polling.distribution_poll_interval_ms),
            config.polling.distribution_max_attempts,
        ),
    }
}

fn scanner_settings(config: &AppConfig) -> ScannerSettings {
    ScannerSettings {
        interval: config.scanner.interval(),
        // bounded by ScannerConfig::validate
        stall_threshold: chrono::Duration::seconds(config.scanner.stall_threshold_secs as i64),
        renewal_lead: chrono::Duration::days(config.scanner.renewal_lead_days),
    }
}

pub fn log_config_summary(config: &AppConfig) {
    info!("Configuration Summary:");
    info!(
        "   Database: {:?} {} (max_conn: {})",
        config.database.backend,
        mask_url(&config.database.url),
        config.database.max_connections
    );
    info!(
        "   Queue: {:?} (visibility timeout {}s)",
        config.queue.backend, config.queue.visibility_timeout_secs
    );
    info!("   Workers: {}", config.worker.concurrency);
    info!(
        "   Retry: every {}s, at most {} attempts",
        config.retry.retry_delay_secs, config.retry.max_attempts
    );
    info!(
        "   DNS: {} (zone {})",
        config.dns.root_domain, config.dns.zone_id
    );
    info!(
        "   Load balancers: {}",
        config.routing.load_balancer_arns.len()
    );
    info!(
        "   Scanners: every {}s, stall after {}s, renew {} days ahead",
        config.scanner.interval_secs,
        config.scanner.stall_threshold_secs,
        config.scanner.renewal_lead_days
    );
}

fn mask_url(url: &str) -> String {
    if let Some(pos) = url.find("://") {
        let (protocol, rest) = url.split_at(pos + 3);
        if let Some(at_pos) = rest.rfind('@') {
            let (credentials, host) = rest.split_at(at_pos);
            let user = credentials.split(':').next().unwrap_or_default();
            return format!("{}{}:****{}", protocol, user, host);
        }
    }
    url.to_string()
}
