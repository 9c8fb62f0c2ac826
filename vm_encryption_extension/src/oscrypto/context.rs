// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use super::distro::{CommandDistroPatcher, DistroPatcher, DistroProfile};
use crate::bek_util::BekUtil;
use crate::command_executor::CommandExecutor;
use crate::common::StatusReporter;
use crate::constants;
use crate::disk_util::DiskUtil;
use crate::error::Error;
use crate::logger;
use crate::result::Result;
use crate::settings::ExtensionSettings;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use vm_encryption_shared::misc_helpers;

/// Paths and retry budgets of the OS disk migration, loaded from `AzureDiskEncryption.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EncryptionEnvironment {
    /// Prefix of every host file read or written, `/` outside of tests.
    pub host_root: PathBuf,
    pub os_encryption_markers_path: PathBuf,
    pub patch_artifacts_path: PathBuf,
    pub encryption_config_path: PathBuf,
    pub azure_crypt_mount_config_path: PathBuf,
    pub bek_mount_point: PathBuf,
    pub luks_header_path: PathBuf,
    pub oldroot_path: PathBuf,
    pub memroot_path: PathBuf,
    pub tmproot_path: PathBuf,
    pub extension_log_path: PathBuf,
    pub unmount_oldroot_max_attempts: u32,
    pub unmount_oldroot_retry_delay_secs: u64,
    pub resume_max_attempts: u32,
    pub resume_retry_delay_secs: u64,
    pub device_wait_max_attempts: u32,
    pub device_wait_delay_secs: u64,
}

impl Default for EncryptionEnvironment {
    fn default() -> Self {
        EncryptionEnvironment {
            host_root: PathBuf::from("/"),
            os_encryption_markers_path: PathBuf::from(
                "/var/lib/azure_disk_encryption_config/os_encryption_markers",
            ),
            patch_artifacts_path: misc_helpers::get_current_exe_dir().join("oscrypto"),
            encryption_config_path: PathBuf::from("/var/lib/azure_disk_encryption_config"),
            azure_crypt_mount_config_path: PathBuf::from(
                "/var/lib/azure_disk_encryption_config/azure_crypt_mount",
            ),
            bek_mount_point: PathBuf::from("/mnt/azure_bek_disk"),
            luks_header_path: PathBuf::from("/boot/luks/osluksheader"),
            oldroot_path: PathBuf::from("/oldroot"),
            memroot_path: PathBuf::from("/memroot"),
            tmproot_path: PathBuf::from("/tmp/tmproot"),
            extension_log_path: PathBuf::from(
                "/var/log/azure/Microsoft.Azure.Security.AzureDiskEncryptionForLinux",
            ),
            unmount_oldroot_max_attempts: 10,
            unmount_oldroot_retry_delay_secs: 10,
            resume_max_attempts: 10,
            resume_retry_delay_secs: 30,
            device_wait_max_attempts: 10,
            device_wait_delay_secs: 2,
        }
    }
}

impl EncryptionEnvironment {
    /// Reads the file named by `AZURE_DISK_ENCRYPTION_CONFIG_FULL_PATH`, or the one beside
    /// the executable.
    pub fn load() -> Result<EncryptionEnvironment> {
        let config_path = match std::env::var(constants::ENCRYPTION_CONFIG_ENV_VAR) {
            Ok(path) => PathBuf::from(path),
            Err(_) => misc_helpers::get_current_exe_dir().join(constants::ENCRYPTION_CONFIG_FILE),
        };
        EncryptionEnvironment::load_from_file(&config_path)
    }

    pub fn load_from_file(config_path: &Path) -> Result<EncryptionEnvironment> {
        if !config_path.try_exists()? {
            logger::write(format!(
                "encryption config '{}' not found, using defaults",
                misc_helpers::path_to_string(config_path)
            ));
            return Ok(EncryptionEnvironment::default());
        }
        Ok(misc_helpers::json_read_from_file(config_path)?)
    }

    /// Maps an absolute host path under `host_root`.
    pub fn host_path(&self, path: &Path) -> PathBuf {
        match path.strip_prefix("/") {
            Ok(relative) => self.host_root.join(relative),
            Err(_) => self.host_root.join(path),
        }
    }

    pub fn unmount_oldroot_retry_delay(&self) -> Duration {
        Duration::from_secs(self.unmount_oldroot_retry_delay_secs)
    }

    pub fn resume_retry_delay(&self) -> Duration {
        Duration::from_secs(self.resume_retry_delay_secs)
    }

    pub fn device_wait_delay(&self) -> Duration {
        Duration::from_secs(self.device_wait_delay_secs)
    }

    /// Where `oldroot_path` shows up once the encrypted root has been pivoted into,
    /// for example `/oldroot/memroot`.
    pub fn memroot_under_oldroot(&self) -> PathBuf {
        match self.memroot_path.strip_prefix("/") {
            Ok(relative) => self.oldroot_path.join(relative),
            Err(_) => self.oldroot_path.join(&self.memroot_path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionConfig {
    pub passphrase_file_name: String,
}

impl EncryptionConfig {
    pub fn from_settings(settings: &ExtensionSettings) -> Self {
        EncryptionConfig {
            passphrase_file_name: settings.passphrase_file_name.clone(),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        EncryptionConfig {
            passphrase_file_name: constants::DEFAULT_PASSPHRASE_FILE_NAME.to_string(),
        }
    }
}

/// Exclusive right to change the mount namespace and boot configuration of the host.
/// It holds an exclusive `flock` on `<markers>/.lock` for as long as it lives and
/// only the `enter` step of a state receives it.
pub struct HostCapability {
    _lock: Flock<File>,
}

impl HostCapability {
    pub fn acquire(markers_dir: &Path) -> Result<HostCapability> {
        misc_helpers::try_create_folder(markers_dir)?;
        let lock_path = markers_dir.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                logger::write(format!(
                    "acquired host lock '{}'",
                    misc_helpers::path_to_string(&lock_path)
                ));
                Ok(HostCapability { _lock: lock })
            }
            Err((_, errno)) => Err(Error::HostLocked(format!(
                "{}: {errno}",
                misc_helpers::path_to_string(&lock_path)
            ))),
        }
    }
}

/// Collaborators shared by every state of one machine.
pub struct OsEncryptionStateContext {
    pub status_reporter: Arc<dyn StatusReporter>,
    pub distro_patcher: Arc<dyn DistroPatcher>,
    pub command_executor: Arc<dyn CommandExecutor>,
    pub disk_util: DiskUtil,
    pub bek_util: BekUtil,
    pub encryption_environment: EncryptionEnvironment,
    pub encryption_config: EncryptionConfig,
    pub profile: DistroProfile,
}

impl OsEncryptionStateContext {
    pub fn new(
        encryption_environment: EncryptionEnvironment,
        encryption_config: EncryptionConfig,
        profile: DistroProfile,
        command_executor: Arc<dyn CommandExecutor>,
        status_reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        let distro_patcher = Arc::new(CommandDistroPatcher::new(
            profile.clone(),
            command_executor.clone(),
        ));
        OsEncryptionStateContext {
            status_reporter,
            distro_patcher,
            disk_util: DiskUtil::new(command_executor.clone(), encryption_environment.clone()),
            bek_util: BekUtil::new(command_executor.clone(), encryption_environment.clone()),
            command_executor,
            encryption_environment,
            encryption_config,
            profile,
        }
    }

    pub fn host_path(&self, path: &str) -> PathBuf {
        self.encryption_environment.host_path(Path::new(path))
    }

    pub fn report_transitioning(&self, message: &str) {
        self.status_reporter.do_status_report(
            constants::ENCRYPTION_OPERATION,
            constants::TRANSITIONING_STATUS,
            constants::STATUS_CODE_OK,
            message,
        );
    }
}
