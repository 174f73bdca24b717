//! Errors raised by remote collaborators (ACME, DNS, cloud APIs)

/// Remote collaborator error
///
/// `NotFound`, `AlreadyExists` and `OrderAlreadyValid` are the enumerated
/// conditions steps may absorb; everything else is `Transient`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote resource not found: {0}")]
    NotFound(String),

    #[error("Remote resource already exists: {0}")]
    AlreadyExists(String),

    #[error("ACME order is already valid")]
    OrderAlreadyValid,

    #[error("Transient remote error: {0}")]
    Transient(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
