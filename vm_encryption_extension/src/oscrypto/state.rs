// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use super::context::HostCapability;
use super::encryption_state::EncryptionState;
use super::marker_store::MarkerStore;
use crate::logger;
use crate::result::Result;

/// How `enter` left the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOutcome {
    Completed,
    /// The process must be relaunched by its supervisor before the next state runs.
    RestartRequested { reason: String },
}

/// Marker bookkeeping shared by every state.
#[derive(Debug, Clone)]
pub struct StateBase {
    pub state: EncryptionState,
    pub markers: MarkerStore,
    pub state_executed: bool,
}

impl StateBase {
    pub fn new(state: EncryptionState, markers: MarkerStore) -> Self {
        StateBase {
            state,
            markers,
            state_executed: false,
        }
    }

    pub fn should_enter(&self) -> Result<bool> {
        if self.state_executed {
            logger::write(format!("state {} already executed in this run", self.state));
            return Ok(false);
        }
        if self.markers.exists(self.state)? {
            logger::write(format!("state {} has an exit marker", self.state));
            return Ok(false);
        }
        Ok(true)
    }

    /// Records the exit marker the first time it is called. Later calls only return true.
    pub fn should_exit(&mut self) -> Result<bool> {
        if !self.markers.exists(self.state)? {
            self.markers.record(self.state)?;
        }
        self.state_executed = true;
        Ok(true)
    }
}

/// One phase of the OS disk migration.
///
/// `enter` is the only step handed the [`HostCapability`], the guards observe the host
/// without changing mount or boot state.
pub trait OsEncryptionState: Send {
    fn base(&self) -> &StateBase;
    fn base_mut(&mut self) -> &mut StateBase;

    /// The side effects of the state, run only when `should_enter` holds.
    fn apply(&mut self, capability: &mut HostCapability) -> Result<StateOutcome>;

    fn state(&self) -> EncryptionState {
        self.base().state
    }

    fn should_enter(&self) -> Result<bool> {
        self.base().should_enter()
    }

    fn enter(&mut self, capability: &mut HostCapability) -> Result<StateOutcome> {
        if !self.should_enter()? {
            logger::write(format!("skipping state {}", self.state()));
            return Ok(StateOutcome::Completed);
        }
        logger::write(format!("entering state {}", self.state()));
        self.apply(capability)
    }

    fn should_exit(&mut self) -> Result<bool> {
        self.base_mut().should_exit()
    }

    /// Called by the machine once the retry budget of this state is spent.
    fn on_retries_exhausted(&mut self) -> Result<()> {
        Ok(())
    }
}
