// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! Locates the BEK (boot encryption key) volume and the passphrase file on it.

use crate::command_executor::CommandExecutor;
use crate::constants;
use crate::disk_util::DiskUtil;
use crate::error::Error;
use crate::logger;
use crate::oscrypto::context::{EncryptionConfig, EncryptionEnvironment};
use crate::result::Result;
use std::path::PathBuf;
use std::sync::Arc;
use vm_encryption_shared::misc_helpers;

#[derive(Clone)]
pub struct BekUtil {
    command_executor: Arc<dyn CommandExecutor>,
    encryption_environment: EncryptionEnvironment,
}

impl BekUtil {
    pub fn new(
        command_executor: Arc<dyn CommandExecutor>,
        encryption_environment: EncryptionEnvironment,
    ) -> Self {
        BekUtil {
            command_executor,
            encryption_environment,
        }
    }

    fn disk_util(&self) -> DiskUtil {
        DiskUtil::new(
            self.command_executor.clone(),
            self.encryption_environment.clone(),
        )
    }

    fn mount_point(&self) -> String {
        misc_helpers::path_to_string(&self.encryption_environment.bek_mount_point)
    }

    /// Returns the passphrase file, mounting the BEK volume first when it is not mounted yet.
    pub fn get_bek_passphrase_file(&self, config: &EncryptionConfig) -> Result<PathBuf> {
        let passphrase_file = self
            .encryption_environment
            .host_path(&self.encryption_environment.bek_mount_point)
            .join(&config.passphrase_file_name);
        if passphrase_file.try_exists()? {
            return Ok(passphrase_file);
        }

        let disk_util = self.disk_util();
        let mount_point = self.mount_point();
        if !disk_util.is_mounted(&mount_point)? {
            let bek_device = disk_util
                .query_dev_path_by_label(constants::BEK_VOLUME_LABEL)?
                .ok_or_else(|| {
                    Error::PassphraseFileNotFound(format!(
                        "no volume labeled '{}'",
                        constants::BEK_VOLUME_LABEL
                    ))
                })?;
            logger::write(format!("mounting BEK volume {bek_device} on {mount_point}"));
            disk_util.make_dirs(&[mount_point.as_str()])?;
            disk_util.mount(&bek_device, &mount_point, None)?;
        }

        if passphrase_file.try_exists()? {
            Ok(passphrase_file)
        } else {
            Err(Error::PassphraseFileNotFound(misc_helpers::path_to_string(
                &passphrase_file,
            )))
        }
    }

    pub fn umount_azure_passhprase(&self, config: &EncryptionConfig, force: bool) -> Result<()> {
        let disk_util = self.disk_util();
        let mount_point = self.mount_point();
        if force || disk_util.is_mounted(&mount_point)? {
            logger::write(format!(
                "unmounting BEK volume holding '{}' from {mount_point}",
                config.passphrase_file_name
            ));
            disk_util.umount(&mount_point)?;
        }
        Ok(())
    }
}
