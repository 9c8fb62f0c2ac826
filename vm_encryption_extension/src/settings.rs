// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::common;
use crate::constants;
use crate::error::Error;
use crate::result::Result;
use crate::structs::{HandlerSettingsFile, PublicSettings};
use std::fmt::{Display, Formatter};
use std::path::Path;
use vm_encryption_shared::misc_helpers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeType {
    Os,
    Data,
    All,
}

impl VolumeType {
    pub fn from_setting(value: &str) -> Result<VolumeType> {
        match value.to_lowercase().as_str() {
            "os" => Ok(VolumeType::Os),
            "data" => Ok(VolumeType::Data),
            "all" => Ok(VolumeType::All),
            _ => Err(Error::InvalidSettings(format!(
                "unknown VolumeType '{value}'"
            ))),
        }
    }

    pub fn includes_os(&self) -> bool {
        matches!(self, VolumeType::Os | VolumeType::All)
    }

    pub fn includes_data(&self) -> bool {
        matches!(self, VolumeType::Data | VolumeType::All)
    }
}

impl Display for VolumeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeType::Os => write!(f, "OS"),
            VolumeType::Data => write!(f, "Data"),
            VolumeType::All => write!(f, "All"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionSettings {
    pub volume_type: VolumeType,
    pub passphrase_file_name: String,
}

impl ExtensionSettings {
    /// Validates the public settings of one `enable` request.
    pub fn from_public_settings(public_settings: &PublicSettings) -> Result<ExtensionSettings> {
        let operation = public_settings
            .EncryptionOperation
            .as_deref()
            .unwrap_or(constants::ENCRYPTION_OPERATION);
        let volume_type =
            VolumeType::from_setting(public_settings.VolumeType.as_deref().unwrap_or("OS"))?;

        if operation.eq_ignore_ascii_case(constants::DISABLE_ENCRYPTION_OPERATION) {
            if volume_type.includes_os() {
                return Err(Error::InvalidSettings(format!(
                    "{operation} is not supported for VolumeType {volume_type}"
                )));
            }
        } else if !operation.eq_ignore_ascii_case(constants::ENCRYPTION_OPERATION) {
            return Err(Error::InvalidSettings(format!(
                "unknown EncryptionOperation '{operation}'"
            )));
        }

        let passphrase_file_name = match &public_settings.PassphraseFileName {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => constants::DEFAULT_PASSPHRASE_FILE_NAME.to_string(),
        };

        Ok(ExtensionSettings {
            volume_type,
            passphrase_file_name,
        })
    }
}

pub fn read_settings(config_folder: &Path, config_seq_no: &str) -> Result<ExtensionSettings> {
    let settings_file = common::get_file_path(
        config_folder,
        &Some(config_seq_no.to_string()),
        constants::CONFIG_FILE_SUFFIX,
    );
    let settings: HandlerSettingsFile = misc_helpers::json_read_from_file(&settings_file)?;
    let public_settings = settings
        .runtimeSettings
        .first()
        .and_then(|s| s.handlerSettings.publicSettings.as_ref())
        .ok_or_else(|| {
            Error::InvalidSettings(format!(
                "no publicSettings in '{}'",
                misc_helpers::path_to_string(&settings_file)
            ))
        })?;
    ExtensionSettings::from_public_settings(public_settings)
}

#[cfg(test)]
mod tests {
    use super::{ExtensionSettings, VolumeType};
    use crate::constants;
    use crate::structs::PublicSettings;
    use std::env;
    use std::fs;
    use vm_encryption_shared::misc_helpers;

    fn public_settings(operation: &str, volume_type: &str) -> PublicSettings {
        PublicSettings {
            EncryptionOperation: Some(operation.to_string()),
            VolumeType: Some(volume_type.to_string()),
            PassphraseFileName: None,
        }
    }

    #[test]
    fn from_public_settings_test() {
        let settings =
            ExtensionSettings::from_public_settings(&public_settings("EnableEncryption", "os"))
                .unwrap();
        assert_eq!(VolumeType::Os, settings.volume_type);
        assert_eq!(
            constants::DEFAULT_PASSPHRASE_FILE_NAME,
            settings.passphrase_file_name
        );

        let settings =
            ExtensionSettings::from_public_settings(&public_settings("EnableEncryption", "ALL"))
                .unwrap();
        assert!(settings.volume_type.includes_os());
        assert!(settings.volume_type.includes_data());

        // the OS volume cannot be decrypted
        assert!(ExtensionSettings::from_public_settings(&public_settings(
            "DisableEncryption",
            "OS"
        ))
        .is_err());
        assert!(ExtensionSettings::from_public_settings(&public_settings(
            "DisableEncryption",
            "Data"
        ))
        .is_ok());

        assert!(
            ExtensionSettings::from_public_settings(&public_settings("Encrypt", "OS")).is_err()
        );
        assert!(ExtensionSettings::from_public_settings(&public_settings(
            "EnableEncryption",
            "Swap"
        ))
        .is_err());
    }

    #[test]
    fn read_settings_test() {
        let mut temp_test_path = env::temp_dir();
        temp_test_path.push("vm_encryption_read_settings_test");
        _ = fs::remove_dir_all(&temp_test_path);
        misc_helpers::try_create_folder(&temp_test_path).unwrap();

        let json_settings = r#"{
            "runtimeSettings": [{
                "handlerSettings": {
                    "publicSettings": {
                        "EncryptionOperation": "EnableEncryption",
                        "VolumeType": "Data",
                        "PassphraseFileName": "custom_passphrase"
                    }
                }
            }]
        }"#;
        fs::write(temp_test_path.join("3.settings"), json_settings).unwrap();

        let settings = super::read_settings(&temp_test_path, "3").unwrap();
        assert_eq!(VolumeType::Data, settings.volume_type);
        assert_eq!("custom_passphrase", settings.passphrase_file_name);

        assert!(super::read_settings(&temp_test_path, "4").is_err());

        _ = fs::remove_dir_all(&temp_test_path);
    }
}
