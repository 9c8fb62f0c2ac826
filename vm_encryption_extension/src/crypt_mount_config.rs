// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! The `azure_crypt_mount` store: one encrypted volume per line.
//!
//! ```text
//! mapper_name dev_path luks_header_path mount_point file_system cleartext_key luks_slot
//! ```
//! Absent values are written as `None`.

use crate::logger;
use crate::oscrypto::context::EncryptionEnvironment;
use crate::result::Result;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use vm_encryption_shared::misc_helpers;

const NONE_VALUE: &str = "None";
const CLEARTEXT_KEY_FILE_PREFIX: &str = "cleartext_key_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptItem {
    pub mapper_name: String,
    pub dev_path: String,
    pub luks_header_path: Option<String>,
    pub mount_point: Option<String>,
    pub file_system: Option<String>,
    pub uses_cleartext_key: bool,
    pub current_luks_slot: Option<i32>,
}

fn optional_field(value: Option<&str>) -> Option<String> {
    match value {
        None => None,
        Some(v) if v.is_empty() || v == NONE_VALUE => None,
        Some(v) => Some(v.to_string()),
    }
}

impl CryptItem {
    /// Parses one store line. Lines written before the cleartext key and key slot
    /// columns existed carry only five fields.
    pub fn from_line(line: &str) -> Option<CryptItem> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            logger::write_warning(format!("ignoring malformed crypt mount line '{line}'"));
            return None;
        }
        Some(CryptItem {
            mapper_name: fields[0].to_string(),
            dev_path: fields[1].to_string(),
            luks_header_path: optional_field(fields.get(2).copied()),
            mount_point: optional_field(fields.get(3).copied()),
            file_system: optional_field(fields.get(4).copied()),
            uses_cleartext_key: fields
                .get(5)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            current_luks_slot: optional_field(fields.get(6).copied())
                .and_then(|v| v.parse::<i32>().ok()),
        })
    }

    pub fn to_line(&self) -> String {
        let or_none = |value: &Option<String>| value.clone().unwrap_or(NONE_VALUE.to_string());
        format!(
            "{} {} {} {} {} {} {}",
            self.mapper_name,
            self.dev_path,
            or_none(&self.luks_header_path),
            or_none(&self.mount_point),
            or_none(&self.file_system),
            if self.uses_cleartext_key { "True" } else { "False" },
            self.current_luks_slot
                .map(|slot| slot.to_string())
                .unwrap_or(NONE_VALUE.to_string()),
        )
    }

    pub fn luks_header(&self) -> Option<&Path> {
        self.luks_header_path.as_deref().map(Path::new)
    }
}

impl Display for CryptItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} on {})",
            self.mapper_name,
            self.dev_path,
            self.mount_point.as_deref().unwrap_or(NONE_VALUE)
        )
    }
}

pub fn parse_crypt_items(content: &str) -> Vec<CryptItem> {
    content.lines().filter_map(CryptItem::from_line).collect()
}

#[derive(Clone)]
pub struct CryptMountConfigUtil {
    encryption_environment: EncryptionEnvironment,
}

impl CryptMountConfigUtil {
    pub fn new(encryption_environment: EncryptionEnvironment) -> Self {
        CryptMountConfigUtil {
            encryption_environment,
        }
    }

    fn config_file(&self) -> PathBuf {
        self.encryption_environment
            .azure_crypt_mount_config_path
            .clone()
    }

    pub fn read_crypt_items(&self) -> Result<Vec<CryptItem>> {
        let config_file = self.config_file();
        if !config_file.try_exists()? {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&config_file)?;
        Ok(parse_crypt_items(&content))
    }

    fn write_crypt_items(&self, items: &[CryptItem]) -> Result<()> {
        let config_file = self.config_file();
        if let Some(parent) = config_file.parent() {
            misc_helpers::try_create_folder(parent)?;
        }
        let mut content = String::new();
        for item in items {
            content.push_str(&item.to_line());
            content.push('\n');
        }
        misc_helpers::write_file_atomically(&config_file, content.as_bytes())?;
        Ok(())
    }

    /// Adds or replaces the item with the same mapper name.
    pub fn add_crypt_item(&self, item: &CryptItem) -> Result<()> {
        let mut items = self.read_crypt_items()?;
        items.retain(|existing| existing.mapper_name != item.mapper_name);
        items.push(item.clone());
        logger::write(format!("adding crypt item {item}"));
        self.write_crypt_items(&items)
    }

    /// Returns false when no item carries `mapper_name`.
    pub fn remove_crypt_item(&self, mapper_name: &str) -> Result<bool> {
        let mut items = self.read_crypt_items()?;
        let count = items.len();
        items.retain(|existing| existing.mapper_name != mapper_name);
        if items.len() == count {
            return Ok(false);
        }
        logger::write(format!("removing crypt item {mapper_name}"));
        self.write_crypt_items(&items)?;
        Ok(true)
    }

    pub fn get_cleartext_key_file_path(&self, mapper_name: &str) -> PathBuf {
        self.encryption_environment
            .encryption_config_path
            .join(format!("{CLEARTEXT_KEY_FILE_PREFIX}{mapper_name}"))
    }
}
