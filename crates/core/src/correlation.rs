//! Correlation module for cross-system log correlation

use crate::{DomainError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation identifier threaded through every step of one operation.
///
/// Live requests use a fresh UUID; the scanners use the fixed labels
/// [`CorrelationId::RECOVERED`] and [`CorrelationId::RENEWAL`] so recovered
/// and renewal chains are easy to pick out of the logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

impl CorrelationId {
    pub const RECOVERED: &'static str = "recovered pipeline";
    pub const RENEWAL: &'static str = "Renewal";

    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an externally supplied correlation id; empty ids are rejected.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::Contract(
                "correlation_id must be set".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn recovered() -> Self {
        Self(Self::RECOVERED.to_string())
    }

    pub fn renewal() -> Self {
        Self(Self::RENEWAL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}
