// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! Distro specific strategy of the OS disk migration, selected once per run from the
//! OS type and version. The states consult the profile instead of being specialised per distro.

use super::encryption_state::EncryptionState;
use crate::command_executor::CommandExecutor;
use crate::disk_util::DiskUtil;
use crate::error::Error;
use crate::logger;
use crate::result::Result;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use vm_encryption_shared::{linux, version::Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistroFamily {
    CentOs68,
    Rhel72,
    Rhel72Lvm,
    Rhel81,
    Ubuntu1604,
    Ubuntu2004,
    Mariner1,
}

impl Display for DistroFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DistroFamily::CentOs68 => write!(f, "CentOS 6.8"),
            DistroFamily::Rhel72 => write!(f, "RHEL 7.2"),
            DistroFamily::Rhel72Lvm => write!(f, "RHEL 7.2 LVM"),
            DistroFamily::Rhel81 => write!(f, "RHEL 8.1"),
            DistroFamily::Ubuntu1604 => write!(f, "Ubuntu 16.04"),
            DistroFamily::Ubuntu2004 => write!(f, "Ubuntu 20.04"),
            DistroFamily::Mariner1 => write!(f, "Mariner 1.0"),
        }
    }
}

/// Offline encryption copies the root partition onto the mapper from an in-memory root.
/// Online encryption re-encrypts the mounted root in place after a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    Offline,
    Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitramfsTool {
    Dracut,
    InitramfsTools,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootParamStyle {
    /// `GRUB_CMDLINE_LINUX` in `/etc/default/grub`, regenerated with the bootloader tool.
    DefaultGrub,
    /// kernel lines of the legacy `/boot/grub/grub.conf`, edited in place.
    LegacyGrubConf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionIdScheme {
    PartUuid,
    LegacySdx,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistroProfile {
    pub family: DistroFamily,
    pub encryption_mode: EncryptionMode,
    pub initramfs_tool: InitramfsTool,
    pub boot_param_style: BootParamStyle,
    pub partition_id_scheme: PartitionIdScheme,
    pub agent_unit_path: String,
    pub dracut_modules_dir: String,
    /// The stripdown state asks for a restart of the daemon from the in-memory root.
    pub restart_agent_after_stripdown: bool,
    /// The unmount state drops its own marker once its retries are exhausted.
    pub clear_unmount_marker_on_exhaustion: bool,
    pub patch_artifacts: Vec<String>,
    pub packages: Vec<String>,
}

impl DistroProfile {
    pub fn for_family(family: DistroFamily) -> DistroProfile {
        let rhel_packages = vec![
            "cryptsetup".to_string(),
            "lsscsi".to_string(),
            "psmisc".to_string(),
            "patch".to_string(),
        ];
        match family {
            DistroFamily::CentOs68 => DistroProfile {
                family,
                encryption_mode: EncryptionMode::Offline,
                initramfs_tool: InitramfsTool::Dracut,
                boot_param_style: BootParamStyle::LegacyGrubConf,
                partition_id_scheme: PartitionIdScheme::PartUuid,
                agent_unit_path: "/etc/init/waagent.conf".to_string(),
                dracut_modules_dir: "/usr/share/dracut/modules.d".to_string(),
                restart_agent_after_stripdown: false,
                clear_unmount_marker_on_exhaustion: true,
                patch_artifacts: vec!["centos_68_dracut.patch".to_string()],
                packages: rhel_packages,
            },
            DistroFamily::Rhel72 | DistroFamily::Rhel72Lvm => DistroProfile {
                family,
                encryption_mode: EncryptionMode::Offline,
                initramfs_tool: InitramfsTool::Dracut,
                boot_param_style: BootParamStyle::DefaultGrub,
                partition_id_scheme: PartitionIdScheme::PartUuid,
                agent_unit_path: "/usr/lib/systemd/system/waagent.service".to_string(),
                dracut_modules_dir: "/usr/lib/dracut/modules.d".to_string(),
                restart_agent_after_stripdown: true,
                clear_unmount_marker_on_exhaustion: false,
                patch_artifacts: if family == DistroFamily::Rhel72Lvm {
                    vec!["rhel_72_lvm_dracut.patch".to_string()]
                } else {
                    vec!["rhel_72_dracut.patch".to_string()]
                },
                packages: rhel_packages,
            },
            DistroFamily::Rhel81 => DistroProfile {
                family,
                encryption_mode: EncryptionMode::Online,
                initramfs_tool: InitramfsTool::Dracut,
                boot_param_style: BootParamStyle::DefaultGrub,
                partition_id_scheme: PartitionIdScheme::PartUuid,
                agent_unit_path: "/usr/lib/systemd/system/waagent.service".to_string(),
                dracut_modules_dir: "/usr/lib/dracut/modules.d".to_string(),
                restart_agent_after_stripdown: false,
                clear_unmount_marker_on_exhaustion: false,
                patch_artifacts: vec!["91adeOnline".to_string()],
                packages: vec!["cryptsetup".to_string(), "lsscsi".to_string()],
            },
            DistroFamily::Mariner1 => DistroProfile {
                family,
                encryption_mode: EncryptionMode::Online,
                initramfs_tool: InitramfsTool::Dracut,
                boot_param_style: BootParamStyle::DefaultGrub,
                partition_id_scheme: PartitionIdScheme::PartUuid,
                agent_unit_path: "/lib/systemd/system/waagent.service".to_string(),
                dracut_modules_dir: "/usr/lib/dracut/modules.d".to_string(),
                restart_agent_after_stripdown: false,
                clear_unmount_marker_on_exhaustion: false,
                patch_artifacts: vec!["91adeOnline".to_string()],
                packages: vec!["cryptsetup".to_string()],
            },
            DistroFamily::Ubuntu1604 => DistroProfile {
                family,
                encryption_mode: EncryptionMode::Offline,
                initramfs_tool: InitramfsTool::InitramfsTools,
                boot_param_style: BootParamStyle::DefaultGrub,
                partition_id_scheme: PartitionIdScheme::LegacySdx,
                agent_unit_path: "/lib/systemd/system/walinuxagent.service".to_string(),
                dracut_modules_dir: String::new(),
                restart_agent_after_stripdown: true,
                clear_unmount_marker_on_exhaustion: false,
                patch_artifacts: vec!["azure_crypt_key.sh".to_string()],
                packages: vec!["cryptsetup-bin".to_string(), "lsscsi".to_string()],
            },
            DistroFamily::Ubuntu2004 => DistroProfile {
                family,
                encryption_mode: EncryptionMode::Online,
                initramfs_tool: InitramfsTool::InitramfsTools,
                boot_param_style: BootParamStyle::DefaultGrub,
                partition_id_scheme: PartitionIdScheme::PartUuid,
                agent_unit_path: "/lib/systemd/system/walinuxagent.service".to_string(),
                dracut_modules_dir: String::new(),
                restart_agent_after_stripdown: false,
                clear_unmount_marker_on_exhaustion: false,
                patch_artifacts: vec!["azure_crypt_key.sh".to_string()],
                packages: vec!["cryptsetup-bin".to_string(), "lsscsi".to_string()],
            },
        }
    }

    /// Picks the family from the `os_info` type and version of the host.
    pub fn detect(os_type: &str, os_version: &str, is_lvm: bool) -> Result<DistroProfile> {
        let unsupported = || Error::UnsupportedDistro(format!("{os_type} {os_version}"));
        let version = Version::from_string(os_version).map_err(|_| unsupported())?;
        let os_type = os_type.to_lowercase();

        let family = if os_type.contains("ubuntu") {
            match version.major {
                16 => DistroFamily::Ubuntu1604,
                major if major >= 20 => DistroFamily::Ubuntu2004,
                _ => return Err(unsupported()),
            }
        } else if os_type.contains("mariner") {
            match version.major {
                1 => DistroFamily::Mariner1,
                _ => return Err(unsupported()),
            }
        } else if os_type.contains("centos")
            || os_type.contains("red hat")
            || os_type.contains("redhat")
            || os_type.contains("rhel")
        {
            match version.major {
                6 if version.minor >= 8 => DistroFamily::CentOs68,
                7 if version.minor >= 2 && is_lvm => DistroFamily::Rhel72Lvm,
                7 if version.minor >= 2 => DistroFamily::Rhel72,
                8 => DistroFamily::Rhel81,
                _ => return Err(unsupported()),
            }
        } else {
            return Err(unsupported());
        };
        Ok(DistroProfile::for_family(family))
    }

    pub fn from_host(disk_util: &DiskUtil) -> Result<DistroProfile> {
        let os_type = linux::get_os_type();
        let os_version = linux::get_os_version();
        let profile = DistroProfile::detect(&os_type, &os_version, disk_util.is_os_disk_lvm()?)?;
        logger::write(format!(
            "detected distro {} from '{os_type} {os_version}'",
            profile.family
        ));
        Ok(profile)
    }

    /// States of a fresh run, in order.
    pub fn pipeline(&self) -> Vec<EncryptionState> {
        match self.encryption_mode {
            EncryptionMode::Offline => vec![
                EncryptionState::Prereq,
                EncryptionState::Selinux,
                EncryptionState::Stripdown,
                EncryptionState::UnmountOldroot,
                EncryptionState::EncryptBlockDevice,
                EncryptionState::PatchBootSystem,
            ],
            EncryptionMode::Online => vec![
                EncryptionState::Prereq,
                EncryptionState::Selinux,
                EncryptionState::EncryptBlockDevice,
                EncryptionState::PatchBootSystem,
            ],
        }
    }

    pub fn has_resume_state(&self) -> bool {
        self.encryption_mode == EncryptionMode::Online
    }

    pub fn is_lvm(&self) -> bool {
        self.family == DistroFamily::Rhel72Lvm
    }
}

/// Package installation and boot tooling, as pass/fail actions.
pub trait DistroPatcher: Send + Sync {
    fn distro_info(&self) -> &DistroProfile;
    fn install_extras(&self) -> Result<()>;
    fn update_initramfs(&self) -> Result<()>;
    fn update_bootloader(&self) -> Result<()>;
}

pub struct CommandDistroPatcher {
    profile: DistroProfile,
    command_executor: Arc<dyn CommandExecutor>,
}

impl CommandDistroPatcher {
    pub fn new(profile: DistroProfile, command_executor: Arc<dyn CommandExecutor>) -> Self {
        CommandDistroPatcher {
            profile,
            command_executor,
        }
    }
}

impl DistroPatcher for CommandDistroPatcher {
    fn distro_info(&self) -> &DistroProfile {
        &self.profile
    }

    fn install_extras(&self) -> Result<()> {
        let package_manager = match self.profile.family {
            DistroFamily::Ubuntu1604 | DistroFamily::Ubuntu2004 => "apt-get",
            DistroFamily::Mariner1 => "tdnf",
            _ => "yum",
        };
        let mut args = vec!["install", "-y"];
        args.extend(self.profile.packages.iter().map(|p| p.as_str()));
        self.command_executor.execute_or_fail(package_manager, &args)?;
        Ok(())
    }

    fn update_initramfs(&self) -> Result<()> {
        match self.profile.initramfs_tool {
            InitramfsTool::Dracut => self
                .command_executor
                .execute_or_fail("dracut", &["-f", "-v"])?,
            InitramfsTool::InitramfsTools => self
                .command_executor
                .execute_or_fail("update-initramfs", &["-u", "-k", "all"])?,
        };
        Ok(())
    }

    fn update_bootloader(&self) -> Result<()> {
        match (self.profile.boot_param_style, self.profile.initramfs_tool) {
            (BootParamStyle::LegacyGrubConf, _) => {
                // grub.conf is edited in place
            }
            (BootParamStyle::DefaultGrub, InitramfsTool::Dracut) => {
                self.command_executor
                    .execute_or_fail("grub2-mkconfig", &["-o", "/boot/grub2/grub.cfg"])?;
            }
            (BootParamStyle::DefaultGrub, InitramfsTool::InitramfsTools) => {
                self.command_executor.execute_or_fail("update-grub", &[])?;
            }
        }
        Ok(())
    }
}
