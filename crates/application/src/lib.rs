//! Application Layer - Pipeline Runtime
//!
//! Turns the static chains of `domain-broker-core` into running work: the
//! step catalogue, the executor with its retry policy, the worker pool that
//! drains the task queue, the periodic scanners and the operation service
//! callers talk to.

pub mod error;
pub mod executor;
pub mod operation_service;
pub mod scanners;
pub mod settings;
pub mod steps;
pub mod worker_pool;

pub use crate::error::{ApplicationError, Result, StepError};
pub use crate::executor::{StepExecutor, StepOutcome};
pub use crate::operation_service::{OperationParameters, OperationService};
pub use crate::scanners::{RenewalScanner, ScanScheduler, StalledOperationScanner};
pub use crate::settings::{PipelineSettings, PollPolicy, RetryPolicy, ScannerSettings};
pub use crate::steps::{Collaborators, StepRunner, StepScope};
pub use crate::worker_pool::{WorkerPool, WorkerPoolConfig};
