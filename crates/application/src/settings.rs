//! Runtime settings of the pipeline engine
//!
//! Plain values handed in by the server after it has loaded and validated the
//! application configuration. Defaults are the production values.

use std::time::Duration;

/// How often a task is retried after a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(600),
            max_attempts: 144,
        }
    }
}

/// In-step polling of a remote change (DNS sync, distribution deploys)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Values the step catalogue needs besides its collaborators
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Zone the broker owns, e.g. `domains.cloud.gov`
    pub root_domain: String,
    pub acme_contact_email: String,
    pub routing_certificate_path: String,
    pub cdn_certificate_path: String,
    /// Candidates for `select-load-balancer`; empty means ask the cloud
    pub load_balancer_arns: Vec<String>,
    pub dns_poll: PollPolicy,
    pub distribution_poll: PollPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            root_domain: "domains.example.com".to_string(),
            acme_contact_email: "admin@example.com".to_string(),
            routing_certificate_path: "/alb/domain-broker/".to_string(),
            cdn_certificate_path: "/cloudfront/domain-broker/".to_string(),
            load_balancer_arns: Vec::new(),
            dns_poll: PollPolicy::new(Duration::from_secs(30), 60),
            distribution_poll: PollPolicy::new(Duration::from_secs(60), 60),
        }
    }
}

/// Thresholds of the periodic scanners
#[derive(Debug, Clone, Copy)]
pub struct ScannerSettings {
    pub interval: Duration,
    /// In-progress operations without a heartbeat for this long are stalled
    pub stall_threshold: chrono::Duration,
    /// Certificates expiring within this window get renewed
    pub renewal_lead: chrono::Duration,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            stall_threshold: chrono::Duration::hours(2),
            renewal_lead: chrono::Duration::days(10),
        }
    }
}
