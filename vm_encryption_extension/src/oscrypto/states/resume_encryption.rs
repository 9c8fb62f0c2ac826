// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::constants;
use crate::error::Error;
use crate::logger;
use crate::oscrypto::context::{HostCapability, OsEncryptionStateContext};
use crate::oscrypto::identity::OsDiskIdentity;
use crate::oscrypto::state::{OsEncryptionState, StateBase, StateOutcome};
use crate::result::Result;
use std::sync::Arc;
use std::thread;

/// Drives an interrupted online re-encryption of the root to completion. A root that has
/// no re-encryption in progress is left alone.
pub struct ResumeEncryptionState {
    base: StateBase,
    context: Arc<OsEncryptionStateContext>,
    identity: OsDiskIdentity,
}

impl ResumeEncryptionState {
    pub fn new(
        base: StateBase,
        context: Arc<OsEncryptionStateContext>,
        identity: OsDiskIdentity,
    ) -> Self {
        ResumeEncryptionState {
            base,
            context,
            identity,
        }
    }
}

impl OsEncryptionState for ResumeEncryptionState {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StateBase {
        &mut self.base
    }

    fn should_enter(&self) -> Result<bool> {
        if !self.base.should_enter()? {
            return Ok(false);
        }
        match self.context.disk_util.get_mount_item("/")? {
            Some(root) if root.src == constants::OS_MAPPER_PATH => Ok(true),
            _ => {
                logger::write(format!("root is not mounted from {}", constants::OS_MAPPER_PATH));
                Ok(false)
            }
        }
    }

    fn apply(&mut self, _capability: &mut HostCapability) -> Result<StateOutcome> {
        let context = &self.context;
        let environment = &context.encryption_environment;
        let disk_util = &context.disk_util;

        let device = disk_util
            .get_luks_backing_device(constants::OS_MAPPER_NAME)?
            .unwrap_or_else(|| self.identity.rootfs_block_device.clone());
        let header = environment.luks_header_path.clone();
        let header = if environment.host_path(&header).try_exists()? {
            Some(header)
        } else {
            None
        };

        if !disk_util.luks_check_reencryption(&device, header.as_deref())? {
            logger::write(format!("no re-encryption in progress on {device}"));
            return Ok(StateOutcome::Completed);
        }

        let passphrase_file = context
            .bek_util
            .get_bek_passphrase_file(&context.encryption_config)?;
        context.report_transitioning("Resuming OS disk re-encryption");
        let max_attempts = environment.resume_max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match disk_util.luks_resume_reencryption(&passphrase_file, &device, header.as_deref()) {
                Ok(()) => {
                    if !disk_util.luks_check_reencryption(&device, header.as_deref())? {
                        logger::write(format!("re-encryption of {device} completed"));
                        return Ok(StateOutcome::Completed);
                    }
                    logger::write(format!(
                        "re-encryption of {device} still in progress after attempt \
                         {attempt}/{max_attempts}"
                    ));
                }
                Err(e) => {
                    logger::write_warning(format!(
                        "re-encryption attempt {attempt}/{max_attempts} of {device} failed: {e}"
                    ));
                }
            }
            if attempt < max_attempts {
                thread::sleep(environment.resume_retry_delay());
            }
        }
        Err(Error::Luks(format!(
            "re-encryption of {device} did not complete after {max_attempts} attempts"
        )))
    }
}
