//! Per-secret protocol state machine.
//!
//! ```text
//!            ┌──────────► Splitting ──► Distributing ──┐
//!            │                 │                       │
//!   Idle ────┤                 └───────────────────────┼──► Idle
//!   (or      │                                         │
//!   Recon-   └──────────► Requesting ──► Collecting ───┤
//!   structed)                                 │        │
//!                                             └──► Reconstructed
//! ```
//!
//! `Idle` and `Reconstructed` are the resting states; any operation may
//! start from either. A busy state may only advance along its own path or
//! fall back to `Idle`. Starting a second operation on a secret while one is
//! in flight is therefore an [`VaultError::InvalidState`].
//!
//! Operations hold a [`Transition`] guard. If the guard is dropped without
//! being finished (error, panic, or the future being cancelled) the secret
//! falls back to `Idle`.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::error::VaultError;

/// Where a secret is in the custody protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolState {
    #[default]
    Idle,
    Splitting,
    Distributing,
    Requesting,
    Collecting,
    Reconstructed,
}

impl ProtocolState {
    /// Resting states accept a new operation.
    pub fn is_at_rest(self) -> bool {
        matches!(self, Self::Idle | Self::Reconstructed)
    }

    /// Whether `self -> to` is a legal move.
    pub fn can_transition(self, to: ProtocolState) -> bool {
        use ProtocolState::*;
        match (self, to) {
            (from, Splitting | Distributing | Requesting | Collecting) if from.is_at_rest() => true,
            (Splitting, Distributing) | (Requesting, Collecting) | (Collecting, Reconstructed) => {
                true
            }
            (from, Idle) => from != Idle,
            _ => false,
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Splitting => "splitting",
            Self::Distributing => "distributing",
            Self::Requesting => "requesting",
            Self::Collecting => "collecting",
            Self::Reconstructed => "reconstructed",
        };
        f.write_str(name)
    }
}

/// Protocol state of every secret a vault has touched. Secrets not in the
/// table are `Idle`.
#[derive(Debug, Default)]
pub struct StateTable {
    states: Mutex<HashMap<String, ProtocolState>>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, secret_id: &str) -> ProtocolState {
        self.states
            .lock()
            .get(secret_id)
            .copied()
            .unwrap_or_default()
    }

    /// Move `secret_id` to `to`, checking the transition under the lock.
    pub fn transition(&self, secret_id: &str, to: ProtocolState) -> Result<(), VaultError> {
        let mut states = self.states.lock();
        let from = states.get(secret_id).copied().unwrap_or_default();
        if !from.can_transition(to) {
            return Err(VaultError::InvalidState {
                secret_id: secret_id.to_owned(),
                from,
                to,
            });
        }
        trace!(secret_id, %from, %to, "protocol state change");
        if to == ProtocolState::Idle {
            states.remove(secret_id);
        } else {
            states.insert(secret_id.to_owned(), to);
        }
        Ok(())
    }

    /// Start an operation: move to `to` and return a guard that falls back
    /// to `Idle` unless finished.
    pub fn begin(&self, secret_id: &str, to: ProtocolState) -> Result<Transition<'_>, VaultError> {
        self.transition(secret_id, to)?;
        Ok(Transition {
            table: self,
            secret_id: secret_id.to_owned(),
            armed: true,
        })
    }

    /// Forget a secret entirely, whatever its state.
    pub fn clear(&self, secret_id: &str) {
        self.states.lock().remove(secret_id);
    }

    /// Forget a resting secret. A secret with an operation in flight keeps
    /// its state, so the operation's guard still owns it. Returns whether
    /// the entry was cleared.
    pub fn clear_at_rest(&self, secret_id: &str) -> bool {
        let mut states = self.states.lock();
        let state = states.get(secret_id).copied().unwrap_or_default();
        if !state.is_at_rest() {
            return false;
        }
        states.remove(secret_id);
        true
    }
}

/// An in-flight operation on one secret. See the module docs.
#[must_use = "dropping a transition immediately resets the secret to idle"]
pub struct Transition<'a> {
    table: &'a StateTable,
    secret_id: String,
    armed: bool,
}

impl Transition<'_> {
    /// Advance the in-flight operation to its next busy state.
    pub fn advance(&self, to: ProtocolState) -> Result<(), VaultError> {
        self.table.transition(&self.secret_id, to)
    }

    /// Complete the operation in state `to` (`Idle` or `Reconstructed`).
    pub fn finish(mut self, to: ProtocolState) -> Result<(), VaultError> {
        self.armed = false;
        let result = self.table.transition(&self.secret_id, to);
        if result.is_err() {
            self.table.clear(&self.secret_id);
        }
        result
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(secret_id = %self.secret_id, "operation did not finish, secret back to idle");
            let mut states = self.table.states.lock();
            states.remove(&self.secret_id);
        }
    }
}
