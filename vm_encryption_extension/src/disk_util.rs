// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! Block device topology queries, mount operations and LUKS operations.

use crate::command_executor::{command_line, CommandExecutor, CommandOutput};
use crate::error::Error;
use crate::logger;
use crate::oscrypto::context::EncryptionEnvironment;
use crate::result::Result;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

/// One row of `lsblk -P` output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceItem {
    pub name: String,
    pub device_type: String,
    pub file_system: String,
    pub mount_point: String,
    pub label: String,
    pub uuid: String,
    pub model: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountItem {
    pub src: String,
    pub dest: String,
    pub fs: String,
}

#[derive(Clone)]
pub struct DiskUtil {
    command_executor: Arc<dyn CommandExecutor>,
    encryption_environment: EncryptionEnvironment,
}

impl DiskUtil {
    pub fn new(
        command_executor: Arc<dyn CommandExecutor>,
        encryption_environment: EncryptionEnvironment,
    ) -> Self {
        DiskUtil {
            command_executor,
            encryption_environment,
        }
    }

    pub fn get_device_items(&self, dev_path: Option<&str>) -> Result<Vec<DeviceItem>> {
        let mut args = vec![
            "-b",
            "-n",
            "-P",
            "-o",
            "NAME,TYPE,FSTYPE,MOUNTPOINT,LABEL,UUID,MODEL,SIZE",
        ];
        if let Some(dev_path) = dev_path {
            args.push(dev_path);
        }
        let output = self.command_executor.execute_or_fail("lsblk", &args)?;
        parse_lsblk_output(&output.stdout())
    }

    /// Mount table as seen by this process, read from `/proc/mounts`.
    pub fn get_mount_items(&self) -> Result<Vec<MountItem>> {
        let mounts_file = self
            .encryption_environment
            .host_path(Path::new("/proc/mounts"));
        let content = fs::read_to_string(mounts_file)?;
        Ok(parse_mounts(&content))
    }

    /// The topmost mount on `dest`.
    pub fn get_mount_item(&self, dest: &str) -> Result<Option<MountItem>> {
        Ok(self
            .get_mount_items()?
            .into_iter()
            .filter(|m| m.dest == dest)
            .last())
    }

    pub fn is_mounted(&self, dest: &str) -> Result<bool> {
        Ok(self.get_mount_item(dest)?.is_some())
    }

    /// The process runs from an in-memory root once it has pivoted out of the OS disk.
    pub fn is_root_in_memory(&self) -> Result<bool> {
        Ok(match self.get_mount_item("/")? {
            Some(root) => is_memory_fs(&root.fs),
            None => false,
        })
    }

    pub fn query_dev_sdx_path_by_uuid(&self, uuid: &str) -> Result<Option<String>> {
        let output = self.command_executor.execute("blkid", &["-U", uuid])?;
        Ok(first_line(&output))
    }

    /// Kernel device name behind a `/dev/disk/by-*` symlink.
    pub fn query_dev_sdx_path_by_link(&self, link: &str) -> Result<Option<String>> {
        let output = self.command_executor.execute("readlink", &["-f", link])?;
        Ok(first_line(&output))
    }

    pub fn query_dev_path_by_label(&self, label: &str) -> Result<Option<String>> {
        let output = self.command_executor.execute("blkid", &["-L", label])?;
        Ok(first_line(&output))
    }

    /// Stable `/dev/disk/by-id` path of a `/dev/sdX` device.
    pub fn query_dev_id_path_by_sdx_path(&self, sdx_path: &str) -> Result<Option<String>> {
        let name_arg = format!("--name={sdx_path}");
        let output = self
            .command_executor
            .execute("udevadm", &["info", "--query=symlink", name_arg.as_str()])?;
        if !output.is_success() {
            return Ok(None);
        }
        Ok(output
            .stdout()
            .split_whitespace()
            .find(|link| link.starts_with("disk/by-id/"))
            .map(|link| format!("/dev/{link}")))
    }

    pub fn get_partuuid(&self, dev_path: &str) -> Result<Option<String>> {
        let output = self
            .command_executor
            .execute("blkid", &["-s", "PARTUUID", "-o", "value", dev_path])?;
        Ok(first_line(&output))
    }

    pub fn get_fs_uuid(&self, dev_path: &str) -> Result<Option<String>> {
        let output = self
            .command_executor
            .execute("blkid", &["-s", "UUID", "-o", "value", dev_path])?;
        Ok(first_line(&output))
    }

    /// Physical volume of the `rootvg` volume group, if the OS disk uses LVM.
    pub fn get_rootvg_pv(&self) -> Result<Option<String>> {
        let output = self
            .command_executor
            .execute("pvs", &["--noheadings", "-o", "pv_name,vg_name"])?;
        if !output.is_success() {
            return Ok(None);
        }
        Ok(parse_pvs_output(&output.stdout(), crate::constants::ROOT_VG_NAME))
    }

    pub fn is_os_disk_lvm(&self) -> Result<bool> {
        Ok(self.get_rootvg_pv()?.is_some())
    }

    pub fn get_luks_backing_device(&self, mapper_name: &str) -> Result<Option<String>> {
        let output = self
            .command_executor
            .execute("cryptsetup", &["status", mapper_name])?;
        if !output.is_success() {
            return Ok(None);
        }
        Ok(output.stdout().lines().find_map(|line| {
            line.trim()
                .strip_prefix("device:")
                .map(|device| device.trim().to_string())
        }))
    }

    pub fn is_luks_mapper_active(&self, mapper_name: &str) -> Result<bool> {
        let output = self
            .command_executor
            .execute("cryptsetup", &["status", mapper_name])?;
        Ok(output.is_success() && output.stdout().contains("is active"))
    }

    fn run_luks(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.command_executor.execute("cryptsetup", args)?;
        if !output.is_success() {
            return Err(Error::Luks(format!(
                "'{}' {}",
                command_line("cryptsetup", args),
                output.message()
            )));
        }
        Ok(output)
    }

    pub fn luks_format(
        &self,
        passphrase_file: &Path,
        dev_path: &str,
        luks_header_path: Option<&Path>,
    ) -> Result<()> {
        let key = passphrase_file.to_string_lossy().to_string();
        let header;
        let mut args = vec!["luksFormat", "-q"];
        if let Some(path) = luks_header_path {
            header = path.to_string_lossy().to_string();
            args.push("--header");
            args.push(header.as_str());
        }
        args.extend(["-d", key.as_str(), dev_path]);
        self.run_luks(&args)?;
        Ok(())
    }

    pub fn luks_open(
        &self,
        passphrase_file: &Path,
        dev_path: &str,
        mapper_name: &str,
        luks_header_path: Option<&Path>,
    ) -> Result<()> {
        let key = passphrase_file.to_string_lossy().to_string();
        let header;
        let mut args = vec!["luksOpen"];
        if let Some(path) = luks_header_path {
            header = path.to_string_lossy().to_string();
            args.push("--header");
            args.push(header.as_str());
        }
        args.extend(["-d", key.as_str(), dev_path, mapper_name]);
        self.run_luks(&args)?;
        Ok(())
    }

    pub fn luks_close(&self, mapper_name: &str) -> Result<()> {
        let output = self
            .command_executor
            .execute("cryptsetup", &["luksClose", mapper_name])?;
        if output.is_success() {
            return Ok(());
        }
        let diagnostic = format!("{} {}", output.stdout(), output.stderr()).to_lowercase();
        if diagnostic.contains("does not exist")
            || diagnostic.contains("doesn't exist")
            || diagnostic.contains("not active")
        {
            return Ok(());
        }
        Err(Error::Luks(format!(
            "'cryptsetup luksClose {mapper_name}' {}",
            output.message()
        )))
    }

    /// Whether the LUKS header records an unfinished online re-encryption.
    pub fn luks_check_reencryption(
        &self,
        dev_path: &str,
        luks_header_path: Option<&Path>,
    ) -> Result<bool> {
        let header;
        let mut args = vec!["luksDump"];
        if let Some(path) = luks_header_path {
            header = path.to_string_lossy().to_string();
            args.push("--header");
            args.push(header.as_str());
        }
        args.push(dev_path);
        let output = self.run_luks(&args)?;
        Ok(output.stdout().contains("online-reencrypt"))
    }

    /// Writes a detached LUKS2 header and marks the device for online encryption
    /// without touching its data.
    pub fn luks_init_reencryption(
        &self,
        passphrase_file: &Path,
        dev_path: &str,
        luks_header_path: &Path,
    ) -> Result<()> {
        let key = passphrase_file.to_string_lossy().to_string();
        let header = luks_header_path.to_string_lossy().to_string();
        self.run_luks(&[
            "reencrypt",
            "--encrypt",
            "--init-only",
            "-q",
            "--header",
            header.as_str(),
            dev_path,
            "-d",
            key.as_str(),
        ])?;
        Ok(())
    }

    pub fn luks_resume_reencryption(
        &self,
        passphrase_file: &Path,
        dev_path: &str,
        luks_header_path: Option<&Path>,
    ) -> Result<()> {
        let key = passphrase_file.to_string_lossy().to_string();
        let header;
        let mut args = vec!["reencrypt", "--resume-only", "-q"];
        if let Some(path) = luks_header_path {
            header = path.to_string_lossy().to_string();
            args.push("--header");
            args.push(header.as_str());
        }
        args.extend([dev_path, "-d", key.as_str()]);
        self.run_luks(&args)?;
        Ok(())
    }

    pub fn mount(&self, src: &str, dest: &str, fs: Option<&str>) -> Result<()> {
        let mut args = Vec::new();
        if let Some(fs) = fs {
            args.push("-t");
            args.push(fs);
        }
        args.push(src);
        args.push(dest);
        self.command_executor.execute_or_fail("mount", &args)?;
        Ok(())
    }

    pub fn umount(&self, path: &str) -> Result<()> {
        let output = self.command_executor.execute("umount", &[path])?;
        if !output.is_success() {
            return Err(Error::UnmountBusy(path.to_string(), output.message()));
        }
        Ok(())
    }

    pub fn move_mount(&self, src: &str, dest: &str) -> Result<()> {
        self.command_executor
            .execute_or_fail("mount", &["--move", src, dest])?;
        Ok(())
    }

    pub fn make_rprivate(&self, path: &str) -> Result<()> {
        self.command_executor
            .execute_or_fail("mount", &["--make-rprivate", path])?;
        Ok(())
    }

    pub fn pivot_root(&self, new_root: &str, put_old: &str) -> Result<()> {
        self.command_executor
            .execute_or_fail("pivot_root", &[new_root, put_old])?;
        Ok(())
    }

    pub fn make_dirs(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["-p"];
        args.extend_from_slice(paths);
        self.command_executor.execute_or_fail("mkdir", &args)?;
        Ok(())
    }

    /// Waits until the kernel exposes the device, sleeping a little longer after every attempt.
    pub fn wait_for_device(&self, dev_path: &str) -> Result<()> {
        let max_attempts = self.encryption_environment.device_wait_max_attempts;
        let delay = self.encryption_environment.device_wait_delay();
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            let output = self
                .command_executor
                .execute("blockdev", &["--getsize64", dev_path])?;
            if output.is_success() {
                return Ok(());
            }
            last_error = output.message();
            logger::write(format!(
                "device {dev_path} not ready on attempt {attempt}/{max_attempts}"
            ));
            if attempt < max_attempts {
                thread::sleep(delay * attempt);
            }
        }
        Err(Error::DeviceNotReady(dev_path.to_string(), last_error))
    }
}

fn first_line(output: &CommandOutput) -> Option<String> {
    if !output.is_success() {
        return None;
    }
    output
        .stdout()
        .lines()
        .map(|l| l.trim().to_string())
        .find(|l| !l.is_empty())
}

pub fn is_memory_fs(fs: &str) -> bool {
    matches!(fs, "tmpfs" | "ramfs" | "none" | "rootfs")
}

pub fn parse_lsblk_output(output: &str) -> Result<Vec<DeviceItem>> {
    let pair_regex = Regex::new(r#"(\w+)="([^"]*)""#)?;
    let mut items = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let properties: HashMap<&str, &str> = pair_regex
            .captures_iter(line)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .collect();
        let get = |key: &str| properties.get(key).map(|v| v.to_string()).unwrap_or_default();
        items.push(DeviceItem {
            name: get("NAME"),
            device_type: get("TYPE"),
            file_system: get("FSTYPE"),
            mount_point: get("MOUNTPOINT"),
            label: get("LABEL"),
            uuid: get("UUID"),
            model: get("MODEL"),
            size: get("SIZE").parse::<u64>().unwrap_or(0),
        });
    }
    Ok(items)
}

/// `/proc/mounts` escapes blanks in paths as octal sequences such as `\040`.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, d| acc * 8 + u16::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    result.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        result.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&result).to_string()
}

pub fn parse_mounts(content: &str) -> Vec<MountItem> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let src = fields.next()?;
            let dest = fields.next()?;
            let fs = fields.next()?;
            Some(MountItem {
                src: unescape_octal(src),
                dest: unescape_octal(dest),
                fs: fs.to_string(),
            })
        })
        .collect()
}

pub fn parse_pvs_output(output: &str, vg_name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let pv_name = fields.next()?;
        match fields.next() {
            Some(vg) if vg == vg_name => Some(pv_name.to_string()),
            _ => None,
        }
    })
}
