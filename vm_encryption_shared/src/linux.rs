// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use once_cell::sync::Lazy;
use os_info::Info;

pub const SYSTEMD_UNIT_FOLDER_PATH: &str = "/lib/systemd/system/";

static OS_INFO: Lazy<Info> = Lazy::new(os_info::get);

pub fn get_os_version() -> String {
    OS_INFO.version().to_string()
}

pub fn get_long_os_version() -> String {
    format!("Linux:{}-{}", OS_INFO.os_type(), OS_INFO.version())
}

/// Distribution name as reported by os_info, for example "Ubuntu", "Redhat", "CentOS" or "Mariner".
pub fn get_os_type() -> String {
    OS_INFO.os_type().to_string()
}

pub fn get_processor_arch() -> String {
    match OS_INFO.architecture() {
        Some(arch) => arch.to_string(),
        None => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn get_os_version_tests() {
        let os_version = super::get_os_version();
        assert_ne!("", os_version, "os version cannot be empty");
        let long_os_version = super::get_long_os_version();
        assert!(
            long_os_version.starts_with("Linux"),
            "long_os_version must starts with 'Linux'"
        );
        assert!(
            long_os_version.ends_with(&os_version),
            "long_os_version must ends with os_version"
        )
    }

    #[test]
    fn get_os_type_test() {
        assert_ne!("", super::get_os_type(), "os type cannot be empty");
    }

    #[test]
    fn get_processor_arch_test() {
        let processor_arch = super::get_processor_arch();
        assert_ne!(
            "unknown", processor_arch,
            "processor arch cannot be 'unknown'"
        );
    }
}
