//! Application error types

use domain_broker_core::DomainError;
use domain_broker_ports::{QueueError, RemoteError};

/// Outcome of a failed step, as seen by the executor's retry policy
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Worth retrying after the retry delay
    #[error("Transient step failure: {0}")]
    Transient(String),

    /// Retrying cannot help; the operation fails
    #[error("Fatal step failure: {0}")]
    Fatal(String),
}

impl StepError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }
}

impl From<DomainError> for StepError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Infrastructure(_) => Self::Transient(err.to_string()),
            DomainError::Validation(_)
            | DomainError::InvalidStateTransition { .. }
            | DomainError::NotFound(_)
            | DomainError::Contract(_) => Self::Fatal(err.to_string()),
        }
    }
}

/// Remote errors that reach `?` were not absorbed by the step, so they are
/// retried like any other remote hiccup.
impl From<RemoteError> for StepError {
    fn from(err: RemoteError) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<QueueError> for StepError {
    fn from(err: QueueError) -> Self {
        Self::Transient(err.to_string())
    }
}

/// Errors surfaced by the operation service, the executor and the scanners
#[derive(thiserror::Error, Debug)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, ApplicationError>;
