// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::constants;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Failed to create regex with error: {0}")]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Shared(#[from] vm_encryption_shared::error::Error),

    #[error("{0} command failed: {1}")]
    Command(String, String),

    #[error("Device '{0}' is not ready: {1}")]
    DeviceNotReady(String, String),

    #[error("Failed to unmount '{0}': {1}")]
    UnmountBusy(String, String),

    #[error("Failed to unmount '{path}' after {attempts} attempts")]
    UnmountRetriesExhausted { path: String, attempts: u32 },

    #[error("Cannot resolve the root filesystem block device: {0}")]
    RootDeviceUnresolved(String),

    #[error("Required patch artifact '{0}' is missing")]
    PatchArtifactMissing(String),

    #[error("Unsupported distro: {0}")]
    UnsupportedDistro(String),

    #[error("LUKS operation failed: {0}")]
    Luks(String),

    #[error("Copy of '{0}' onto the encrypted device was interrupted and cannot be repeated")]
    InterruptedCopy(String),

    #[error("Host is locked by another encryption process: {0}")]
    HostLocked(String),

    #[error("BEK passphrase file not found: {0}")]
    PassphraseFileNotFound(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("State marker error: {0}")]
    Marker(String),
}

impl Error {
    /// Transient errors are retried by the unmount loop and the device wait helper;
    /// every other error terminates the encryption run.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::DeviceNotReady(..) | Error::UnmountBusy(..))
    }

    pub fn status_code(&self) -> i32 {
        match self {
            Error::UnmountBusy(..) | Error::UnmountRetriesExhausted { .. } => {
                constants::UNMOUNT_OLDROOT_ERROR
            }
            Error::UnsupportedDistro(_) => constants::NOT_SUPPORTED_OS_VERSION,
            Error::PassphraseFileNotFound(_) => constants::PASSPHRASE_FILE_NOT_FOUND_ERROR,
            Error::InvalidSettings(_) => constants::INVALID_SETTINGS_ERROR,
            Error::RootDeviceUnresolved(_) => constants::ROOT_DEVICE_UNRESOLVED_ERROR,
            Error::HostLocked(_) => constants::HOST_LOCKED_ERROR,
            Error::PatchArtifactMissing(_) => constants::PATCH_ARTIFACT_MISSING_ERROR,
            Error::Luks(_)
            | Error::InterruptedCopy(_)
            | Error::Command(..)
            | Error::DeviceNotReady(..) => constants::ENCRYPTION_FAILED_ERROR,
            _ => constants::UNKNOWN_ERROR,
        }
    }
}
