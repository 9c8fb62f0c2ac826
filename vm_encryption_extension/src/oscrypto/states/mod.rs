// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
pub mod encrypt_block_device;
pub mod patch_boot_system;
pub mod prereq;
pub mod resume_encryption;
pub mod selinux;
pub mod stripdown;
pub mod unmount_oldroot;

use super::context::OsEncryptionStateContext;
use super::encryption_state::EncryptionState;
use super::identity::OsDiskIdentity;
use super::marker_store::MarkerStore;
use super::state::{OsEncryptionState, StateBase};
use crate::constants;
use crate::error::Error;
use crate::logger;
use crate::result::Result;
use std::sync::Arc;

/// The states of a fresh run of the profile, in order.
pub fn build_pipeline(
    context: &Arc<OsEncryptionStateContext>,
    identity: &OsDiskIdentity,
) -> Vec<Box<dyn OsEncryptionState>> {
    context
        .profile
        .pipeline()
        .into_iter()
        .filter_map(|state| build_state(state, context, identity))
        .collect()
}

pub fn build_state(
    state: EncryptionState,
    context: &Arc<OsEncryptionStateContext>,
    identity: &OsDiskIdentity,
) -> Option<Box<dyn OsEncryptionState>> {
    let base = StateBase::new(
        state,
        MarkerStore::new(&context.encryption_environment.os_encryption_markers_path),
    );
    let context = context.clone();
    let identity = identity.clone();
    Some(match state {
        EncryptionState::Prereq => Box::new(prereq::PrereqState::new(base, context)),
        EncryptionState::Selinux => Box::new(selinux::SelinuxState::new(base, context)),
        EncryptionState::Stripdown => Box::new(stripdown::StripdownState::new(base, context)),
        EncryptionState::UnmountOldroot => Box::new(unmount_oldroot::UnmountOldrootState::new(
            base, context, identity,
        )),
        EncryptionState::EncryptBlockDevice => Box::new(
            encrypt_block_device::EncryptBlockDeviceState::new(base, context, identity),
        ),
        EncryptionState::PatchBootSystem => Box::new(
            patch_boot_system::PatchBootSystemState::new(base, context, identity),
        ),
        EncryptionState::ResumeEncryption => Box::new(
            resume_encryption::ResumeEncryptionState::new(base, context, identity),
        ),
        EncryptionState::Uninitialized | EncryptionState::Completed => return None,
    })
}

/// Mounts the boot file system on `/boot` unless something is mounted there already.
pub(crate) fn mount_boot_partition(
    context: &OsEncryptionStateContext,
    identity: &OsDiskIdentity,
) -> Result<()> {
    let disk_util = &context.disk_util;
    if disk_util.is_mounted("/boot")? {
        return Ok(());
    }
    let boot_device = identity.bootfs_block_device.as_deref().ok_or_else(|| {
        Error::RootDeviceUnresolved("no boot partition to hold the LUKS header".to_string())
    })?;
    logger::write(format!("mounting {boot_device} on /boot"));
    disk_util.make_dirs(&["/boot"])?;
    disk_util.mount(boot_device, "/boot", None)
}

/// Opens the root partition as `osencrypt` through the detached header. The mapper does not
/// survive a relaunch of the daemon.
pub(crate) fn open_os_mapper(
    context: &OsEncryptionStateContext,
    identity: &OsDiskIdentity,
) -> Result<()> {
    let disk_util = &context.disk_util;
    if disk_util.is_luks_mapper_active(constants::OS_MAPPER_NAME)? {
        return Ok(());
    }
    let passphrase_file = context
        .bek_util
        .get_bek_passphrase_file(&context.encryption_config)?;
    let header = context.encryption_environment.luks_header_path.clone();
    disk_util.luks_open(
        &passphrase_file,
        &identity.rootfs_block_device,
        constants::OS_MAPPER_NAME,
        Some(&header),
    )?;
    disk_util.wait_for_device(constants::OS_MAPPER_PATH)
}
