// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::command_executor::CommandExecutor;
use crate::common::StatusReporter;
use crate::constants;
use crate::oscrypto::context::{EncryptionConfig, EncryptionEnvironment, OsEncryptionStateContext};
use crate::oscrypto::distro::{DistroFamily, DistroProfile};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

pub const ROOT_UUID: &str = "4a5b6c7d-0000-4000-8000-000000000002";
pub const BOOT_UUID: &str = "0a1b2c3d-0000-4000-8000-000000000001";

/// Fake host file system under a temp folder, removed when dropped.
pub struct TestHost {
    temp_dir: PathBuf,
}

impl TestHost {
    pub fn new(name: &str) -> Self {
        let temp_dir = env::temp_dir().join(name);
        // clean up and ignore the clean up errors
        _ = fs::remove_dir_all(&temp_dir);
        let host = TestHost { temp_dir };
        for dir in ["etc", "proc", "usr", "var", "boot"] {
            fs::create_dir_all(host.root().join(dir)).unwrap();
        }
        fs::create_dir_all(host.artifacts()).unwrap();
        host.write_file(
            &format!("mnt/azure_bek_disk/{}", constants::DEFAULT_PASSPHRASE_FILE_NAME),
            "passphrase",
        );
        host.write_mounts("/dev/sda2 / xfs rw,relatime 0 0\n");
        host.write_fstab(&format!(
            "UUID={ROOT_UUID} / xfs defaults 0 0\nUUID={BOOT_UUID} /boot xfs defaults 0 0\n"
        ));
        host
    }

    pub fn root(&self) -> PathBuf {
        self.temp_dir.join("root")
    }

    pub fn markers(&self) -> PathBuf {
        self.temp_dir.join("markers")
    }

    pub fn artifacts(&self) -> PathBuf {
        self.temp_dir.join("artifacts")
    }

    pub fn environment(&self) -> EncryptionEnvironment {
        EncryptionEnvironment {
            host_root: self.root(),
            os_encryption_markers_path: self.markers(),
            patch_artifacts_path: self.artifacts(),
            encryption_config_path: self.temp_dir.join("config"),
            azure_crypt_mount_config_path: self.temp_dir.join("config").join("azure_crypt_mount"),
            unmount_oldroot_max_attempts: 3,
            unmount_oldroot_retry_delay_secs: 0,
            resume_max_attempts: 3,
            resume_retry_delay_secs: 0,
            device_wait_max_attempts: 3,
            device_wait_delay_secs: 0,
            ..Default::default()
        }
    }

    pub fn context(
        &self,
        family: DistroFamily,
        executor: Arc<dyn CommandExecutor>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Arc<OsEncryptionStateContext> {
        Arc::new(OsEncryptionStateContext::new(
            self.environment(),
            EncryptionConfig::default(),
            DistroProfile::for_family(family),
            executor,
            reporter,
        ))
    }

    /// Creates every patch artifact the family requires.
    pub fn add_artifacts(&self, family: DistroFamily) {
        for artifact in DistroProfile::for_family(family).patch_artifacts {
            let path = self.artifacts().join(&artifact);
            if artifact.contains('.') {
                fs::write(path, "artifact").unwrap();
            } else {
                fs::create_dir_all(path).unwrap();
            }
        }
    }

    pub fn write_file(&self, relative_path: &str, content: &str) {
        let path = self.root().join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn read_file(&self, relative_path: &str) -> String {
        fs::read_to_string(self.root().join(relative_path)).unwrap_or_default()
    }

    pub fn write_mounts(&self, content: &str) {
        self.write_file("proc/mounts", content);
    }

    pub fn write_fstab(&self, content: &str) {
        self.write_file("etc/fstab", content);
    }
}

impl Drop for TestHost {
    fn drop(&mut self) {
        _ = fs::remove_dir_all(&self.temp_dir);
    }
}
