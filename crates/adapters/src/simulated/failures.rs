//! Failure injection shared by the simulated collaborators

use domain_broker_ports::{RemoteError, RemoteResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureMode {
    Times(u32),
    Always,
}

/// Per-call transient failures, keyed by the simulated method name.
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    modes: Arc<Mutex<HashMap<&'static str, FailureMode>>>,
}

impl FailurePlan {
    /// Fail the next `times` calls of `call`
    pub fn fail_next(&self, call: &'static str, times: u32) {
        self.modes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(call, FailureMode::Times(times));
    }

    /// Fail every call of `call` until [`FailurePlan::clear`]
    pub fn fail_always(&self, call: &'static str) {
        self.modes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(call, FailureMode::Always);
    }

    pub fn clear(&self) {
        self.modes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub(crate) fn check(&self, call: &'static str) -> RemoteResult<()> {
        let mut modes = self.modes.lock().unwrap_or_else(PoisonError::into_inner);
        match modes.get_mut(call) {
            Some(FailureMode::Always) => {
                Err(RemoteError::Transient(format!("injected failure in {}", call)))
            }
            Some(FailureMode::Times(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(RemoteError::Transient(format!("injected failure in {}", call)))
            }
            _ => Ok(()),
        }
    }
}
