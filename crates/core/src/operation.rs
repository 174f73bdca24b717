//! Operation Domain Entity
//!
//! An Operation is the persisted record of one workflow attempt (provision,
//! deprovision or renew) against one service instance. Its `updated_at` is
//! bumped by every step commit and doubles as the liveness heartbeat read by
//! the stalled-operation scanner.

use crate::instance::InstanceId;
use crate::{DomainError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operation identifier - Value Object (assigned by the entity store)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub i64);

impl OperationId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workflow an operation drives - Value Object (Enum)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Provision,
    Deprovision,
    Renew,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Provision, Action::Deprovision, Action::Renew];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "Provision",
            Self::Deprovision => "Deprovision",
            Self::Renew => "Renew",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(action: &str) -> Result<Self> {
        match action {
            "Provision" => Ok(Self::Provision),
            "Deprovision" => Ok(Self::Deprovision),
            "Renew" => Ok(Self::Renew),
            _ => Err(DomainError::Validation(format!(
                "invalid operation action: {}",
                action
            ))),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operation state - Value Object (Enum)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    InProgress,
    Succeeded,
    Failed,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(state: &str) -> Result<Self> {
        match state {
            "in progress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(DomainError::Validation(format!(
                "invalid operation state: {}",
                state
            ))),
        }
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operation aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub instance_id: InstanceId,
    pub action: Action,
    pub state: OperationState,
    pub step_description: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled_at.is_some()
    }

    /// In progress and not canceled: still expected to make progress.
    pub fn is_open(&self) -> bool {
        !self.is_terminal() && !self.is_canceled()
    }

    pub fn describe(&mut self, description: impl Into<String>) {
        self.step_description = Some(description.into());
    }

    /// Transition `InProgress -> Succeeded`.
    pub fn succeed(&mut self) -> Result<()> {
        self.transition(OperationState::Succeeded)
    }

    /// Transition `InProgress -> Failed`.
    pub fn fail(&mut self) -> Result<()> {
        self.transition(OperationState::Failed)
    }

    pub fn cancel(&mut self, at: DateTime<Utc>) {
        if self.canceled_at.is_none() {
            self.canceled_at = Some(at);
        }
    }

    /// The row left behind when this copy is written over `stored`.
    ///
    /// Writers may hold a copy loaded before a cancellation or a terminal
    /// transition landed; neither is ever undone by such a write.
    pub fn written_over(&self, stored: &Operation) -> Operation {
        let mut merged = self.clone();
        if stored.is_terminal() {
            merged.state = stored.state;
            merged.step_description = stored.step_description.clone();
        }
        merged.canceled_at = stored.canceled_at.or(self.canceled_at);
        merged
    }

    fn transition(&mut self, to: OperationState) -> Result<()> {
        if self.state == to {
            return Ok(());
        }
        if self.state.is_terminal() {
            return Err(DomainError::invalid_state_transition(
                self.state.as_str(),
                to.as_str(),
            ));
        }
        self.state = to;
        Ok(())
    }
}

/// Values needed to create an operation; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub instance_id: InstanceId,
    pub action: Action,
    pub step_description: Option<String>,
}

impl NewOperation {
    pub fn new(instance_id: InstanceId, action: Action) -> Self {
        Self {
            instance_id,
            action,
            step_description: Some("Queuing tasks".to_string()),
        }
    }
}

/// What polling callers see: state and a human-readable progress marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub state: OperationState,
    pub step_description: Option<String>,
}

impl From<&Operation> for OperationStatus {
    fn from(operation: &Operation) -> Self {
        Self {
            state: operation.state,
            step_description: operation.step_description.clone(),
        }
    }
}
