// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! Resumes interrupted online re-encryption of data volumes, one worker thread per device.

use crate::crypt_mount_config::{CryptItem, CryptMountConfigUtil};
use crate::disk_util::DiskUtil;
use crate::error::Error;
use crate::logger;
use crate::oscrypto::context::OsEncryptionStateContext;
use crate::result::Result;
use concurrent_queue::ConcurrentQueue;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use vm_encryption_shared::misc_helpers;

pub type EncryptionWork = (CryptItem, PathBuf);

struct DeviceResult {
    mapper_name: String,
    error: Option<String>,
}

pub struct OnlineEncryptionHandler {
    disk_util: DiskUtil,
    log_lock: Mutex<()>,
}

impl OnlineEncryptionHandler {
    pub fn new(disk_util: DiskUtil) -> Self {
        OnlineEncryptionHandler {
            disk_util,
            log_lock: Mutex::new(()),
        }
    }

    fn log(&self, message: String) {
        let _guard = self.log_lock.lock().unwrap_or_else(PoisonError::into_inner);
        logger::write(format!(
            "[{}] {message}",
            misc_helpers::get_thread_identity()
        ));
    }

    fn resume_device(&self, item: &CryptItem, key_file: &Path) -> Result<()> {
        self.log(format!("resuming re-encryption of {item}"));
        self.disk_util
            .luks_resume_reencryption(key_file, &item.dev_path, item.luks_header())?;
        if self
            .disk_util
            .luks_check_reencryption(&item.dev_path, item.luks_header())?
        {
            return Err(Error::Luks(format!(
                "re-encryption of {} is still in progress",
                item.dev_path
            )));
        }
        self.log(format!("re-encryption of {item} completed"));
        Ok(())
    }

    fn worker(&self, queue: &ConcurrentQueue<EncryptionWork>, results: &Mutex<Vec<DeviceResult>>) {
        while let Ok((item, key_file)) = queue.pop() {
            let error = match self.resume_device(&item, &key_file) {
                Ok(()) => None,
                Err(e) => {
                    self.log(format!("re-encryption of {item} failed: {e}"));
                    Some(e.to_string())
                }
            };
            results
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(DeviceResult {
                    mapper_name: item.mapper_name,
                    error,
                });
        }
    }

    /// Resumes every queued device and joins all workers before returning.
    /// Fails when any device fails.
    pub fn handle(&self, work: Vec<EncryptionWork>) -> Result<usize> {
        let worker_count = work.len();
        if worker_count == 0 {
            return Ok(0);
        }

        let queue = ConcurrentQueue::unbounded();
        for unit in work {
            if queue.push(unit).is_err() {
                return Err(Error::Luks("the encryption work queue is closed".to_string()));
            }
        }
        queue.close();

        let results = Mutex::new(Vec::with_capacity(worker_count));
        thread::scope(|scope| {
            for _ in 0..worker_count {
                scope.spawn(|| self.worker(&queue, &results));
            }
        });

        let results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        let failures: Vec<String> = results
            .iter()
            .filter_map(|r| {
                r.error
                    .as_ref()
                    .map(|e| format!("{}: {e}", r.mapper_name))
            })
            .collect();
        if !failures.is_empty() {
            return Err(Error::Luks(failures.join("; ")));
        }
        Ok(results.len())
    }
}

/// Finds data volumes whose LUKS header records an unfinished re-encryption and
/// hands them to an [`OnlineEncryptionHandler`].
pub struct OnlineEncryptionResumer {
    context: Arc<OsEncryptionStateContext>,
    crypt_mount_config_util: CryptMountConfigUtil,
}

impl OnlineEncryptionResumer {
    pub fn new(context: Arc<OsEncryptionStateContext>) -> Self {
        let crypt_mount_config_util =
            CryptMountConfigUtil::new(context.encryption_environment.clone());
        OnlineEncryptionResumer {
            context,
            crypt_mount_config_util,
        }
    }

    fn key_file(&self, item: &CryptItem) -> Result<PathBuf> {
        if item.uses_cleartext_key {
            return Ok(self
                .crypt_mount_config_util
                .get_cleartext_key_file_path(&item.mapper_name));
        }
        self.context
            .bek_util
            .get_bek_passphrase_file(&self.context.encryption_config)
    }

    /// Returns the number of devices resumed, 0 when nothing was in progress.
    pub fn begin_resume(&self) -> Result<usize> {
        let disk_util = &self.context.disk_util;
        let mut work = Vec::new();
        for item in self.crypt_mount_config_util.read_crypt_items()? {
            if !disk_util.luks_check_reencryption(&item.dev_path, item.luks_header())? {
                continue;
            }
            logger::write(format!("re-encryption of {item} is in progress"));
            let key_file = self.key_file(&item)?;
            work.push((item, key_file));
        }

        if work.is_empty() {
            logger::write("no data volume re-encryption in progress".to_string());
            return Ok(0);
        }
        self.context.report_transitioning(&format!(
            "Resuming re-encryption of {} data volume(s)",
            work.len()
        ));
        OnlineEncryptionHandler::new(disk_util.clone()).handle(work)
    }
}
