// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! Resolves the root and boot block devices of the OS disk from the live mount table,
//! falling back to `/etc/fstab` once the root is no longer mounted where it used to be.

use super::context::EncryptionEnvironment;
use crate::constants;
use crate::disk_util::{self, DiskUtil};
use crate::error::Error;
use crate::logger;
use crate::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use vm_encryption_shared::misc_helpers;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsDiskIdentity {
    /// Device holding the root file system, a stable `/dev/disk/by-id` path when udev knows one.
    pub rootfs_block_device: String,
    pub rootfs_sdx_path: String,
    pub bootfs_block_device: Option<String>,
    pub rootfs_disk: String,
    pub rootfs_fstype: String,
    pub is_lvm: bool,
    /// The process runs from an in-memory root and the OS disk shows up under `/oldroot`.
    pub is_pivoted: bool,
}

impl OsDiskIdentity {
    pub fn resolve(disk_util: &DiskUtil, environment: &EncryptionEnvironment) -> Result<Self> {
        let oldroot = misc_helpers::path_to_string(&environment.oldroot_path);
        let mut is_pivoted = false;
        let (mut source, mut fstype) = match disk_util.get_mount_item("/")? {
            Some(root) if disk_util::is_memory_fs(&root.fs) => {
                is_pivoted = true;
                logger::write(format!(
                    "root is mounted on {}, resolving the OS disk through {oldroot}",
                    root.fs
                ));
                match disk_util.get_mount_item(&oldroot)? {
                    Some(item) => (item.src, item.fs),
                    None => (String::new(), String::new()),
                }
            }
            Some(root) => (root.src, root.fs),
            None => (String::new(), String::new()),
        };

        if !source.is_empty() && source != "none" {
            source = canonical_device_path(disk_util, &source)?;
        }

        let fstab = read_fstab(environment)?;
        if source.is_empty() || source == "none" {
            let root_uuid = fstab_uuid(&fstab, "/")?.ok_or_else(|| {
                Error::RootDeviceUnresolved("no root mount and no root UUID in fstab".to_string())
            })?;
            source = disk_util
                .query_dev_sdx_path_by_uuid(&root_uuid)?
                .ok_or_else(|| {
                    Error::RootDeviceUnresolved(format!("no block device with UUID {root_uuid}"))
                })?;
            fstype = fstab_fstype(&fstab, "/").unwrap_or_default();
        }

        let boot_from_fstab = match fstab_uuid(&fstab, "/boot")? {
            Some(uuid) => disk_util.query_dev_sdx_path_by_uuid(&uuid)?,
            None => None,
        };

        let identity = if let Some(pv) = disk_util.get_rootvg_pv()? {
            OsDiskIdentity {
                rootfs_block_device: pv.clone(),
                rootfs_disk: split_partition(&pv)?
                    .map(|(disk, _)| disk)
                    .unwrap_or_else(|| pv.clone()),
                rootfs_sdx_path: pv,
                bootfs_block_device: boot_from_fstab,
                rootfs_fstype: fstype,
                is_lvm: true,
                is_pivoted,
            }
        } else if source == constants::OS_MAPPER_PATH || source.starts_with("/dev/dm-") {
            let backing = disk_util
                .get_luks_backing_device(constants::OS_MAPPER_NAME)?
                .unwrap_or_else(|| source.clone());
            OsDiskIdentity {
                rootfs_block_device: backing.clone(),
                rootfs_disk: split_partition(&backing)?
                    .map(|(disk, _)| disk)
                    .unwrap_or_else(|| backing.clone()),
                rootfs_sdx_path: backing,
                bootfs_block_device: boot_from_fstab,
                rootfs_fstype: fstype,
                is_lvm: false,
                is_pivoted,
            }
        } else {
            let (disk, partition) = split_partition(&source)?.ok_or_else(|| {
                Error::RootDeviceUnresolved(format!("'{source}' is not a disk partition"))
            })?;
            let mut rootfs_sdx_path = source.clone();
            let mut bootfs = match partition {
                1 => Some(partition_path(&disk, 2)),
                2 => Some(partition_path(&disk, 1)),
                _ => None,
            };
            if let Some(sibling) = bootfs.clone() {
                // some images carry the root on partition 1 and /boot on partition 2
                let root_size = device_size(disk_util, &rootfs_sdx_path)?;
                let boot_size = device_size(disk_util, &sibling)?;
                if let (Some(root_size), Some(boot_size)) = (root_size, boot_size) {
                    if boot_size > root_size {
                        logger::write(format!(
                            "{sibling} is larger than {rootfs_sdx_path}, swapping root and boot"
                        ));
                        bootfs = Some(rootfs_sdx_path);
                        rootfs_sdx_path = sibling;
                    }
                }
            } else {
                bootfs = boot_from_fstab;
            }
            let rootfs_block_device = disk_util
                .query_dev_id_path_by_sdx_path(&rootfs_sdx_path)?
                .unwrap_or_else(|| rootfs_sdx_path.clone());
            OsDiskIdentity {
                rootfs_block_device,
                rootfs_sdx_path,
                bootfs_block_device: bootfs,
                rootfs_disk: disk,
                rootfs_fstype: fstype,
                is_lvm: false,
                is_pivoted,
            }
        };

        if identity.bootfs_block_device.is_none() {
            logger::write_warning("boot file system block device not resolved".to_string());
        }
        logger::write(format!("resolved OS disk identity: {identity:?}"));
        Ok(identity)
    }
}

/// Resolves `UUID=` references and `/dev/disk/by-*` links to the kernel device path.
fn canonical_device_path(disk_util: &DiskUtil, source: &str) -> Result<String> {
    let uuid = source
        .strip_prefix("UUID=")
        .or_else(|| source.strip_prefix("/dev/disk/by-uuid/"));
    let resolved = if let Some(uuid) = uuid {
        disk_util.query_dev_sdx_path_by_uuid(uuid)?
    } else if source.starts_with("/dev/disk/") {
        disk_util.query_dev_sdx_path_by_link(source)?
    } else {
        return Ok(source.to_string());
    };
    let resolved = resolved.ok_or_else(|| {
        Error::RootDeviceUnresolved(format!("'{source}' does not resolve to a block device"))
    })?;
    logger::write(format!("{source} resolves to {resolved}"));
    Ok(resolved)
}

fn read_fstab(environment: &EncryptionEnvironment) -> Result<String> {
    let fstab = environment.host_path(Path::new("/etc/fstab"));
    if !fstab.try_exists()? {
        return Ok(String::new());
    }
    Ok(fs::read_to_string(fstab)?)
}

/// UUID of the file system fstab mounts on `mount_point`.
pub fn fstab_uuid(fstab: &str, mount_point: &str) -> Result<Option<String>> {
    let re = Regex::new(&format!(
        r"(?m)^\s*UUID=(\S+)\s+{}\s+",
        regex::escape(mount_point)
    ))?;
    Ok(re.captures(fstab).map(|c| c[1].to_string()))
}

fn fstab_fstype(fstab: &str, mount_point: &str) -> Option<String> {
    fstab.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() > 2 && !fields[0].starts_with('#') && fields[1] == mount_point {
            Some(fields[2].to_string())
        } else {
            None
        }
    })
}

/// Splits `/dev/sda2` into `/dev/sda` and 2, and `/dev/nvme0n1p2` into `/dev/nvme0n1` and 2.
pub fn split_partition(dev_path: &str) -> Result<Option<(String, u32)>> {
    let with_p = Regex::new(r"^(/dev/(?:nvme\d+n\d+|mmcblk\d+))p(\d+)$")?;
    let plain = Regex::new(r"^(/dev/[a-z]+)(\d+)$")?;
    for re in [with_p, plain] {
        if let Some(c) = re.captures(dev_path) {
            if let Ok(number) = c[2].parse::<u32>() {
                return Ok(Some((c[1].to_string(), number)));
            }
        }
    }
    Ok(None)
}

fn partition_path(disk: &str, number: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{number}")
    } else {
        format!("{disk}{number}")
    }
}

fn device_size(disk_util: &DiskUtil, dev_path: &str) -> Result<Option<u64>> {
    Ok(disk_util
        .get_device_items(Some(dev_path))?
        .first()
        .map(|item| item.size))
}
