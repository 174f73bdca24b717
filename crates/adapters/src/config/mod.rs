//! Application configuration

mod app_config;
mod tests;

pub use app_config::{
    AcmeConfig, AppConfig, Backend, CertificatesConfig, ConfigError, DatabaseConfig, DnsConfig,
    LogFormat, LoggingConfig, PollingConfig, QueueConfig, Result, RetryConfig, RoutingConfig,
    ScannerConfig, WorkerConfig,
};
