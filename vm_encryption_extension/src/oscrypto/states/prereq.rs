// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::logger;
use crate::oscrypto::boot_config;
use crate::oscrypto::context::{HostCapability, OsEncryptionStateContext};
use crate::oscrypto::state::{OsEncryptionState, StateBase, StateOutcome};
use crate::result::Result;
use std::sync::Arc;
use vm_encryption_shared::misc_helpers;

/// Keeps the guest agent from killing the daemon when it restarts, then installs the tools
/// the later states shell out to.
pub struct PrereqState {
    base: StateBase,
    context: Arc<OsEncryptionStateContext>,
}

impl PrereqState {
    pub fn new(base: StateBase, context: Arc<OsEncryptionStateContext>) -> Self {
        PrereqState { base, context }
    }
}

impl OsEncryptionState for PrereqState {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StateBase {
        &mut self.base
    }

    fn apply(&mut self, _capability: &mut HostCapability) -> Result<StateOutcome> {
        self.context.report_transitioning("Entering prereq state");

        let profile = &self.context.profile;
        let unit_file = self.context.host_path(&profile.agent_unit_path);
        if !profile.agent_unit_path.ends_with(".service") {
            logger::write(format!(
                "agent unit '{}' is not a systemd unit, leaving it unchanged",
                profile.agent_unit_path
            ));
        } else if unit_file.try_exists()? {
            if boot_config::edit_file(&unit_file, boot_config::add_kill_mode_process)? {
                logger::write(format!(
                    "set KillMode=process in '{}'",
                    misc_helpers::path_to_string(&unit_file)
                ));
                self.context
                    .command_executor
                    .execute_or_fail("systemctl", &["daemon-reload"])?;
            }
        } else {
            logger::write_warning(format!(
                "agent unit '{}' not found",
                misc_helpers::path_to_string(&unit_file)
            ));
        }

        self.context.distro_patcher.install_extras()?;
        Ok(StateOutcome::Completed)
    }
}
