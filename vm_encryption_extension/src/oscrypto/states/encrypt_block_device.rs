// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::constants;
use crate::error::Error;
use crate::logger;
use crate::oscrypto::context::{HostCapability, OsEncryptionStateContext};
use crate::oscrypto::distro::EncryptionMode;
use crate::oscrypto::identity::OsDiskIdentity;
use crate::oscrypto::state::{OsEncryptionState, StateBase, StateOutcome};
use crate::result::Result;
use std::path::PathBuf;
use std::sync::Arc;
use vm_encryption_shared::misc_helpers;

/// Size of the detached LUKS header file.
const LUKS_HEADER_SIZE: &str = "33554432";
const COPY_STARTED_STEP: &str = "CopyStarted";
const COPY_COMPLETED_STEP: &str = "CopyCompleted";

/// Puts the root partition under LUKS with a detached header on `/boot`.
///
/// Offline, the partition is formatted, opened as `osencrypt` and copied onto the mapper
/// block by block. Online, the header is initialised for in-place re-encryption, which
/// runs after the reboot.
pub struct EncryptBlockDeviceState {
    base: StateBase,
    context: Arc<OsEncryptionStateContext>,
    identity: OsDiskIdentity,
}

impl EncryptBlockDeviceState {
    pub fn new(
        base: StateBase,
        context: Arc<OsEncryptionStateContext>,
        identity: OsDiskIdentity,
    ) -> Self {
        EncryptBlockDeviceState {
            base,
            context,
            identity,
        }
    }

    fn luks_header(&self) -> PathBuf {
        self.context.encryption_environment.luks_header_path.clone()
    }

    fn header_exists(&self) -> Result<bool> {
        let header = self.luks_header();
        Ok(self
            .context
            .encryption_environment
            .host_path(&header)
            .try_exists()?)
    }

    fn create_header_file(&self) -> Result<()> {
        let header = self.luks_header();
        if let Some(folder) = header.parent() {
            let folder = misc_helpers::path_to_string(folder);
            self.context.disk_util.make_dirs(&[folder.as_str()])?;
        }
        let of = format!("of={}", misc_helpers::path_to_string(&header));
        let bs = format!("bs={LUKS_HEADER_SIZE}");
        self.context.command_executor.execute_or_fail(
            "dd",
            &["if=/dev/zero", of.as_str(), bs.as_str(), "count=1"],
        )?;
        Ok(())
    }

    /// The block copy reads plaintext from the partition and writes it through the mapper
    /// onto the same sectors, so a copy that was cut short cannot simply be run again.
    fn encrypt_offline(&self) -> Result<()> {
        let disk_util = &self.context.disk_util;
        let markers = &self.base.markers;
        let state = self.base.state;
        let device = &self.identity.rootfs_block_device;
        if markers.step_exists(state, COPY_COMPLETED_STEP)? {
            logger::write(format!(
                "{device} was already copied onto {}",
                constants::OS_MAPPER_PATH
            ));
            return Ok(());
        }
        if markers.step_exists(state, COPY_STARTED_STEP)? {
            logger::write_error(format!(
                "the copy of {device} onto {} did not finish",
                constants::OS_MAPPER_PATH
            ));
            return Err(Error::InterruptedCopy(self.identity.rootfs_sdx_path.clone()));
        }

        let header = self.luks_header();
        if !self.header_exists()? {
            let passphrase_file = self
                .context
                .bek_util
                .get_bek_passphrase_file(&self.context.encryption_config)?;
            self.create_header_file()?;
            disk_util.luks_format(&passphrase_file, device, Some(&header))?;
            logger::write(format!("formatted {device} with a detached LUKS header"));
        } else {
            logger::write("LUKS header already exists, skipping luksFormat".to_string());
        }
        super::open_os_mapper(&self.context, &self.identity)?;

        self.context
            .report_transitioning("OS disk encryption started");
        markers.record_step(state, COPY_STARTED_STEP)?;
        let input = format!("if={}", self.identity.rootfs_sdx_path);
        let output = format!("of={}", constants::OS_MAPPER_PATH);
        self.context.command_executor.execute_or_fail(
            "dd",
            &[input.as_str(), output.as_str(), "conv=sparse", "bs=64K"],
        )?;
        markers.record_step(state, COPY_COMPLETED_STEP)?;
        logger::write(format!("copied {device} onto {}", constants::OS_MAPPER_PATH));
        Ok(())
    }

    fn encrypt_online(&self) -> Result<()> {
        if self.header_exists()? {
            logger::write("LUKS header already exists, re-encryption is initialised".to_string());
            return Ok(());
        }
        let passphrase_file = self
            .context
            .bek_util
            .get_bek_passphrase_file(&self.context.encryption_config)?;
        let header = self.luks_header();
        if let Some(folder) = header.parent() {
            let folder = misc_helpers::path_to_string(folder);
            self.context.disk_util.make_dirs(&[folder.as_str()])?;
        }
        self.context.disk_util.luks_init_reencryption(
            &passphrase_file,
            &self.identity.rootfs_block_device,
            &header,
        )?;
        self.context
            .report_transitioning("OS disk re-encryption initialised, it resumes after the reboot");
        Ok(())
    }
}

impl OsEncryptionState for EncryptBlockDeviceState {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StateBase {
        &mut self.base
    }

    fn apply(&mut self, _capability: &mut HostCapability) -> Result<StateOutcome> {
        self.context
            .report_transitioning("Entering encrypt block device state");
        super::mount_boot_partition(&self.context, &self.identity)?;
        match self.context.profile.encryption_mode {
            EncryptionMode::Offline => self.encrypt_offline()?,
            EncryptionMode::Online => self.encrypt_online()?,
        }
        Ok(StateOutcome::Completed)
    }
}
