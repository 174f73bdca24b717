//! Domain Broker Server Library
//!
//! Process wiring of the broker: configuration, logging, storage backends,
//! remote collaborators, the worker pool and the periodic scanners.

pub mod bootstrap;
pub mod telemetry;

pub use bootstrap::{
    BootstrapError, BrokerRuntime, Result as BootstrapResult, SimulatedRemotes, initialize,
    log_config_summary,
};
pub use telemetry::init_tracing;
