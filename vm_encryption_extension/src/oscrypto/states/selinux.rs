// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::logger;
use crate::oscrypto::boot_config;
use crate::oscrypto::context::{HostCapability, OsEncryptionStateContext};
use crate::oscrypto::state::{OsEncryptionState, StateBase, StateOutcome};
use crate::result::Result;
use std::fs;
use std::sync::Arc;

const SELINUX_CONFIG: &str = "/etc/selinux/config";

/// Switches an enforcing SELinux to permissive, both now and for the next boot.
pub struct SelinuxState {
    base: StateBase,
    context: Arc<OsEncryptionStateContext>,
}

impl SelinuxState {
    pub fn new(base: StateBase, context: Arc<OsEncryptionStateContext>) -> Self {
        SelinuxState { base, context }
    }
}

impl OsEncryptionState for SelinuxState {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StateBase {
        &mut self.base
    }

    fn apply(&mut self, _capability: &mut HostCapability) -> Result<StateOutcome> {
        let config_file = self.context.host_path(SELINUX_CONFIG);
        if !config_file.try_exists()?
            || !boot_config::is_selinux_enforcing(&fs::read_to_string(&config_file)?)
        {
            logger::write("SELinux is not enforcing".to_string());
            return Ok(StateOutcome::Completed);
        }

        self.context.report_transitioning("Entering selinux state");
        self.context
            .command_executor
            .execute_or_fail("setenforce", &["0"])?;
        boot_config::edit_file(&config_file, boot_config::set_selinux_permissive)?;
        logger::write("SELinux set to permissive".to_string());
        Ok(StateOutcome::Completed)
    }
}
