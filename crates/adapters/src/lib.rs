//! Adapters - Infrastructure Implementations
//!
//! This crate contains the implementations of the ports defined in
//! domain-broker-ports, plus the application configuration.

pub mod config;
pub mod memory;
pub mod postgres;
pub mod simulated;

pub use crate::config::{AppConfig, ConfigError};
pub use crate::memory::{InMemoryEntityStore, InMemoryTaskQueue};
pub use crate::postgres::{PostgresEntityStore, PostgresTaskQueue};
pub use crate::simulated::{
    FailurePlan, SimulatedAcmeClient, SimulatedCdn, SimulatedCertificateStore,
    SimulatedCnameResolver, SimulatedDnsProvider, SimulatedLoadBalancers,
};
