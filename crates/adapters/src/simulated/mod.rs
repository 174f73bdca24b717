//! Simulated remote collaborators
//!
//! In-process stand-ins for the ACME CA, the DNS provider and the cloud APIs.
//! They honour the same absence and idempotency contracts as the real
//! services and can be told to fail transiently, which is what the pipeline
//! tests and local runs of the worker rely on.

pub mod acme;
pub mod cloud;
pub mod dns;
pub mod failures;

pub use acme::SimulatedAcmeClient;
pub use cloud::{
    CDN_HOSTED_ZONE_ID, SimulatedCdn, SimulatedCertificateStore, SimulatedLoadBalancers,
};
pub use dns::{SimulatedCnameResolver, SimulatedDnsProvider};
pub use failures::FailurePlan;
