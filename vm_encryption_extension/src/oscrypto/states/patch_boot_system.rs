// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::constants;
use crate::error::Error;
use crate::logger;
use crate::oscrypto::boot_config;
use crate::oscrypto::context::{HostCapability, OsEncryptionStateContext};
use crate::oscrypto::distro::{BootParamStyle, EncryptionMode, InitramfsTool, PartitionIdScheme};
use crate::oscrypto::identity::OsDiskIdentity;
use crate::oscrypto::state::{OsEncryptionState, StateBase, StateOutcome};
use crate::result::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vm_encryption_shared::misc_helpers;

/// Mount points moved between the in-memory root and the encrypted root while pivoted.
const PIVOTED_MOUNTS: [&str; 4] = ["dev", "proc", "sys", "boot"];
const CRYPT_KEY_SCRIPT: &str = "/usr/sbin/azure_crypt_key.sh";

/// Teaches the initramfs and the bootloader to open the encrypted root.
///
/// Offline, the encrypted root is mounted on `/oldroot` and pivoted into so the boot
/// tools run against it, then the in-memory root is pivoted back. The reverse pivot
/// runs whether or not the edits succeeded.
pub struct PatchBootSystemState {
    base: StateBase,
    context: Arc<OsEncryptionStateContext>,
    identity: OsDiskIdentity,
}

impl PatchBootSystemState {
    pub fn new(
        base: StateBase,
        context: Arc<OsEncryptionStateContext>,
        identity: OsDiskIdentity,
    ) -> Self {
        PatchBootSystemState {
            base,
            context,
            identity,
        }
    }

    fn check_artifacts(&self) -> Result<()> {
        let artifacts_path = &self.context.encryption_environment.patch_artifacts_path;
        for artifact in &self.context.profile.patch_artifacts {
            let path = artifacts_path.join(artifact);
            if !path.try_exists()? {
                return Err(Error::PatchArtifactMissing(misc_helpers::path_to_string(
                    &path,
                )));
            }
        }
        Ok(())
    }

    fn oldroot(&self) -> String {
        misc_helpers::path_to_string(&self.context.encryption_environment.oldroot_path)
    }

    fn memroot(&self) -> String {
        misc_helpers::path_to_string(&self.context.encryption_environment.memroot_path)
    }

    fn mount_encrypted_root(&self, oldroot: &str) -> Result<()> {
        let disk_util = &self.context.disk_util;
        disk_util.make_dirs(&[oldroot])?;
        if disk_util.is_mounted(oldroot)? {
            return Ok(());
        }
        super::open_os_mapper(&self.context, &self.identity)?;
        if self.identity.is_lvm {
            self.context
                .command_executor
                .execute_or_fail("vgchange", &["-ay", constants::ROOT_VG_NAME])?;
            let root_lv = format!("/dev/mapper/{}-rootlv", constants::ROOT_VG_NAME);
            disk_util.mount(&root_lv, oldroot, None)
        } else {
            disk_util.mount(constants::OS_MAPPER_PATH, oldroot, None)
        }
    }

    fn pivot_into_encrypted_root(&self) -> Result<()> {
        let disk_util = &self.context.disk_util;
        let oldroot = self.oldroot();
        let memroot = self.memroot();
        let memroot_under_oldroot = misc_helpers::path_to_string(
            &self.context.encryption_environment.memroot_under_oldroot(),
        );
        disk_util.make_rprivate("/")?;
        disk_util.make_dirs(&[memroot_under_oldroot.as_str()])?;
        disk_util.pivot_root(&oldroot, &memroot_under_oldroot)?;
        for dir in PIVOTED_MOUNTS {
            disk_util.move_mount(&format!("{memroot}/{dir}"), &format!("/{dir}"))?;
        }
        logger::write(format!("pivoted into the encrypted root, in-memory root is on {memroot}"));
        Ok(())
    }

    fn pivot_back_to_memory_root(&self) -> Result<()> {
        let disk_util = &self.context.disk_util;
        let oldroot = self.oldroot();
        let memroot = self.memroot();
        let memroot_under_oldroot = misc_helpers::path_to_string(
            &self.context.encryption_environment.memroot_under_oldroot(),
        );
        disk_util.make_rprivate("/")?;
        disk_util.pivot_root(&memroot, &format!("{memroot}{oldroot}"))?;
        self.context
            .command_executor
            .execute_or_fail("rmdir", &[memroot_under_oldroot.as_str()])?;
        for dir in PIVOTED_MOUNTS {
            disk_util.move_mount(&format!("{oldroot}/{dir}"), &format!("/{dir}"))?;
        }
        logger::write("pivoted back into the in-memory root".to_string());
        Ok(())
    }

    /// Edits the boot configuration of the root currently mounted on `/`. The patch
    /// artifacts are read from `artifact_root`.
    fn modify_pivoted_root(&self, artifact_root: &Path) -> Result<()> {
        let context = &self.context;
        let profile = &context.profile;
        let disk_util = &context.disk_util;
        let executor = &context.command_executor;

        let root_partuuid = disk_util
            .get_partuuid(&self.identity.rootfs_sdx_path)?
            .ok_or_else(|| {
                Error::RootDeviceUnresolved(format!(
                    "no PARTUUID for {}",
                    self.identity.rootfs_sdx_path
                ))
            })?;
        let boot_uuid = match &self.identity.bootfs_block_device {
            Some(boot) => disk_util.get_fs_uuid(boot)?,
            None => None,
        };

        match profile.initramfs_tool {
            InitramfsTool::Dracut => {
                for artifact in &profile.patch_artifacts {
                    let source = misc_helpers::path_to_string(&artifact_root.join(artifact));
                    if artifact.ends_with(".patch") {
                        let output = executor.execute(
                            "patch",
                            &[
                                "-b",
                                "-d",
                                profile.dracut_modules_dir.as_str(),
                                "-p1",
                                "-N",
                                "-i",
                                source.as_str(),
                            ],
                        )?;
                        if !output.is_success()
                            && !output.stdout().contains("previously applied")
                        {
                            return Err(Error::Command(
                                format!("patch {source}"),
                                output.message(),
                            ));
                        }
                    } else {
                        executor.execute_or_fail(
                            "cp",
                            &["-r", source.as_str(), profile.dracut_modules_dir.as_str()],
                        )?;
                    }
                }

                let mut modules = " crypt".to_string();
                if self.identity.is_lvm {
                    modules.push_str(" lvm");
                }
                if profile.encryption_mode == EncryptionMode::Online {
                    modules.push_str(" adeOnline");
                }
                let modules_line = format!("add_dracutmodules+=\"{modules}\"");
                boot_config::edit_file(&context.host_path("/etc/dracut.conf"), |content| {
                    let content = boot_config::append_line_once(
                        content,
                        "add_drivers+=\" fat nls_cp437 nls_iso8859-1\"",
                    );
                    boot_config::append_line_once(&content, &modules_line)
                })?;

                let mut kernel_args = vec![format!("rd.luks.ade.partuuid={root_partuuid}")];
                if let Some(boot_uuid) = &boot_uuid {
                    kernel_args.push(format!("rd.luks.ade.bootuuid={boot_uuid}"));
                }
                match profile.boot_param_style {
                    BootParamStyle::DefaultGrub => {
                        boot_config::edit_file(&context.host_path("/etc/default/grub"), |c| {
                            boot_config::ensure_kernel_args(c, &kernel_args)
                        })?;
                    }
                    BootParamStyle::LegacyGrubConf => {
                        boot_config::edit_file(&context.host_path("/boot/grub/grub.conf"), |c| {
                            boot_config::patch_legacy_grub_conf(c, &kernel_args)
                        })?;
                    }
                }
            }
            InitramfsTool::InitramfsTools => {
                for artifact in &profile.patch_artifacts {
                    let source = misc_helpers::path_to_string(&artifact_root.join(artifact));
                    executor.execute_or_fail("cp", &[source.as_str(), CRYPT_KEY_SCRIPT])?;
                }
                executor.execute_or_fail("chmod", &["+x", CRYPT_KEY_SCRIPT])?;
            }
        }

        let entry = self.crypttab_entry(&root_partuuid);
        boot_config::edit_file(&context.host_path("/etc/crypttab"), |content| {
            boot_config::ensure_crypttab_entry(content, constants::OS_MAPPER_NAME, &entry)
        })?;
        logger::write(format!("crypttab entry: {entry}"));

        context.distro_patcher.update_initramfs()?;
        context.distro_patcher.update_bootloader()?;
        Ok(())
    }

    fn crypttab_entry(&self, root_partuuid: &str) -> String {
        let environment = &self.context.encryption_environment;
        let profile = &self.context.profile;
        let header = misc_helpers::path_to_string(&environment.luks_header_path);
        let options = format!("luks,discard,header={header}");
        match (profile.partition_id_scheme, profile.initramfs_tool) {
            (PartitionIdScheme::LegacySdx, _) => format!(
                "{} {} none {options},keyscript={CRYPT_KEY_SCRIPT}",
                constants::OS_MAPPER_NAME,
                self.identity.rootfs_sdx_path
            ),
            (PartitionIdScheme::PartUuid, InitramfsTool::InitramfsTools) => format!(
                "{} PARTUUID={root_partuuid} none {options},keyscript={CRYPT_KEY_SCRIPT}",
                constants::OS_MAPPER_NAME
            ),
            (PartitionIdScheme::PartUuid, InitramfsTool::Dracut) => format!(
                "{} PARTUUID={root_partuuid} {}/{} {options}",
                constants::OS_MAPPER_NAME,
                misc_helpers::path_to_string(&environment.bek_mount_point),
                self.context.encryption_config.passphrase_file_name
            ),
        }
    }

    fn patch_offline(&self) -> Result<()> {
        let oldroot = self.oldroot();
        super::mount_boot_partition(&self.context, &self.identity)?;
        self.mount_encrypted_root(&oldroot)?;

        // the artifacts stay reachable through the in-memory root while pivoted
        let artifacts_path = &self.context.encryption_environment.patch_artifacts_path;
        let artifact_root = PathBuf::from(self.memroot()).join(
            artifacts_path
                .strip_prefix("/")
                .unwrap_or(artifacts_path.as_path()),
        );

        let result = self
            .pivot_into_encrypted_root()
            .and_then(|_| self.modify_pivoted_root(&artifact_root));
        let unwind = self.pivot_back_to_memory_root();
        match (result, unwind) {
            (Err(e), Err(unwind_error)) => {
                logger::write_error(format!(
                    "failed to pivot back after a failed boot patch: {unwind_error}"
                ));
                return Err(e);
            }
            (Err(e), Ok(())) => return Err(e),
            (Ok(()), Err(unwind_error)) => return Err(unwind_error),
            (Ok(()), Ok(())) => {}
        }

        let log_path =
            misc_helpers::path_to_string(&self.context.encryption_environment.extension_log_path);
        let log_source = format!("{log_path}/.");
        let log_dest = format!("{oldroot}{log_path}");
        let output = self.context.command_executor.execute(
            "cp",
            &["-ax", log_source.as_str(), log_dest.as_str()],
        )?;
        if !output.is_success() {
            logger::write_warning(format!(
                "failed to copy the extension logs: {}",
                output.message()
            ));
        }

        let disk_util = &self.context.disk_util;
        disk_util.umount("/boot")?;
        disk_util.umount(&oldroot)?;
        Ok(())
    }
}

impl OsEncryptionState for PatchBootSystemState {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StateBase {
        &mut self.base
    }

    fn apply(&mut self, _capability: &mut HostCapability) -> Result<StateOutcome> {
        self.context
            .report_transitioning("Entering patch boot system state");
        self.check_artifacts()?;
        match self.context.profile.encryption_mode {
            EncryptionMode::Offline => self.patch_offline()?,
            EncryptionMode::Online => {
                let artifacts_path =
                    self.context.encryption_environment.patch_artifacts_path.clone();
                self.modify_pivoted_root(&artifacts_path)?;
            }
        }
        Ok(StateOutcome::Completed)
    }
}
