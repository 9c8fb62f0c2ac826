// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! Text edits of the boot configuration files. Every edit is idempotent so a state can be
//! re-entered after a crash without duplicating lines.

use crate::result::Result;
use std::fs;
use std::path::Path;
use vm_encryption_shared::misc_helpers;

/// Appends `line` unless a line with the same trimmed content is already present.
pub fn append_line_once(content: &str, line: &str) -> String {
    if content.lines().any(|l| l.trim() == line.trim()) {
        return content.to_string();
    }
    let mut updated = content.to_string();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(line);
    updated.push('\n');
    updated
}

/// Replaces every entry of `mapper_name` with `entry`, so the file ends up with exactly one.
pub fn ensure_crypttab_entry(content: &str, mapper_name: &str, entry: &str) -> String {
    let mut updated = String::new();
    for line in content.lines() {
        if line.split_whitespace().next() == Some(mapper_name) {
            continue;
        }
        updated.push_str(line);
        updated.push('\n');
    }
    updated.push_str(entry);
    updated.push('\n');
    updated
}

/// Sets `KillMode=process` in the `[Service]` section of a systemd unit, so stopping the
/// agent does not kill the encryption daemon it launched.
pub fn add_kill_mode_process(content: &str) -> String {
    let mut updated = String::new();
    let mut in_service = false;
    let mut written = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            if in_service && !written {
                updated.push_str("KillMode=process\n");
                written = true;
            }
            in_service = trimmed == "[Service]";
        } else if in_service && trimmed.starts_with("KillMode=") {
            if !written {
                updated.push_str("KillMode=process\n");
                written = true;
            }
            continue;
        }
        updated.push_str(line);
        updated.push('\n');
    }
    if in_service && !written {
        updated.push_str("KillMode=process\n");
    }
    updated
}

/// Adds `args` to `GRUB_CMDLINE_LINUX` of `/etc/default/grub`, skipping the ones present.
pub fn ensure_kernel_args(content: &str, args: &[String]) -> String {
    let mut updated = String::new();
    let mut found = false;
    for line in content.lines() {
        match line.strip_prefix("GRUB_CMDLINE_LINUX=") {
            Some(value) if !found => {
                found = true;
                let mut params = value.trim().trim_matches('"').to_string();
                add_missing_params(&mut params, args);
                updated.push_str(&format!("GRUB_CMDLINE_LINUX=\"{params}\"\n"));
            }
            _ => {
                updated.push_str(line);
                updated.push('\n');
            }
        }
    }
    if !found {
        let mut params = String::new();
        add_missing_params(&mut params, args);
        updated.push_str(&format!("GRUB_CMDLINE_LINUX=\"{params}\"\n"));
    }
    updated
}

/// Edits the `kernel` lines of a legacy `grub.conf`: `rd_NO_LUKS` is dropped and `args` added.
pub fn patch_legacy_grub_conf(content: &str, args: &[String]) -> String {
    let mut updated = String::new();
    for line in content.lines() {
        if line.trim_start().starts_with("kernel ") {
            let mut params = line
                .split(' ')
                .filter(|token| *token != "rd_NO_LUKS")
                .collect::<Vec<&str>>()
                .join(" ");
            add_missing_params(&mut params, args);
            updated.push_str(&params);
        } else {
            updated.push_str(line);
        }
        updated.push('\n');
    }
    updated
}

fn add_missing_params(params: &mut String, args: &[String]) {
    for arg in args {
        if params.split_whitespace().any(|p| p == arg) {
            continue;
        }
        if !params.is_empty() {
            params.push(' ');
        }
        params.push_str(arg);
    }
}

pub fn is_selinux_enforcing(content: &str) -> bool {
    content
        .lines()
        .any(|line| line.trim().replace(' ', "") == "SELINUX=enforcing")
}

pub fn set_selinux_permissive(content: &str) -> String {
    let mut updated = String::new();
    for line in content.lines() {
        if line.trim().replace(' ', "").starts_with("SELINUX=") {
            updated.push_str("SELINUX=permissive");
        } else {
            updated.push_str(line);
        }
        updated.push('\n');
    }
    updated
}

/// Reads `path`, applies `edit` and writes the result back atomically when it changed.
/// A missing file is edited as an empty one. Returns whether the file was written.
pub fn edit_file<F>(path: &Path, edit: F) -> Result<bool>
where
    F: FnOnce(&str) -> String,
{
    let content = if path.try_exists()? {
        fs::read_to_string(path)?
    } else {
        String::new()
    };
    let updated = edit(&content);
    if updated == content {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        misc_helpers::try_create_folder(parent)?;
    }
    misc_helpers::write_file_atomically(path, updated.as_bytes())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;

    #[test]
    fn append_line_once_test() {
        let content = "hostonly=\"yes\"";
        let updated = super::append_line_once(content, "add_dracutmodules+=\" crypt\"");
        assert_eq!("hostonly=\"yes\"\nadd_dracutmodules+=\" crypt\"\n", updated);
        assert_eq!(
            updated,
            super::append_line_once(&updated, "add_dracutmodules+=\" crypt\"")
        );
        assert_eq!("line\n", super::append_line_once("", "line"));
    }

    #[test]
    fn crypttab_entry_test() {
        let content = "# <target name> <source device> <key file> <options>\n\
                       osencrypt /dev/sda2 none luks\n\
                       resourceencrypt /dev/sdb1 /mnt/key luks\n";
        let entry = "osencrypt PARTUUID=abcd /mnt/azure_bek_disk/LinuxPassPhraseFileName luks,discard,header=/boot/luks/osluksheader";
        let updated = super::ensure_crypttab_entry(content, "osencrypt", entry);
        assert_eq!(
            1,
            updated.lines().filter(|l| l.starts_with("osencrypt")).count()
        );
        assert!(updated.contains("resourceencrypt /dev/sdb1"));
        assert!(updated.contains(entry));
        assert_eq!(updated, super::ensure_crypttab_entry(&updated, "osencrypt", entry));
    }

    #[test]
    fn kill_mode_test() {
        let unit = "[Unit]\nDescription=Azure Linux Agent\n\n[Service]\nType=simple\nKillMode=control-group\n\n[Install]\nWantedBy=multi-user.target\n";
        let updated = super::add_kill_mode_process(unit);
        assert!(updated.contains("KillMode=process"));
        assert!(!updated.contains("KillMode=control-group"));
        assert_eq!(updated, super::add_kill_mode_process(&updated));

        let unit = "[Unit]\nDescription=Azure Linux Agent\n[Service]\nType=simple\n";
        let updated = super::add_kill_mode_process(unit);
        assert_eq!(
            "[Unit]\nDescription=Azure Linux Agent\n[Service]\nType=simple\nKillMode=process\n",
            updated
        );
    }

    #[test]
    fn kernel_args_test() {
        let grub = "GRUB_TIMEOUT=1\nGRUB_CMDLINE_LINUX=\"console=ttyS0 earlyprintk=ttyS0\"\n";
        let args = vec![
            "rd.luks.ade.partuuid=abcd".to_string(),
            "rd.luks.ade.bootuuid=1234".to_string(),
        ];
        let updated = super::ensure_kernel_args(grub, &args);
        assert!(updated.contains(
            "GRUB_CMDLINE_LINUX=\"console=ttyS0 earlyprintk=ttyS0 rd.luks.ade.partuuid=abcd rd.luks.ade.bootuuid=1234\""
        ));
        assert_eq!(updated, super::ensure_kernel_args(&updated, &args));

        let updated = super::ensure_kernel_args("GRUB_TIMEOUT=1\n", &args);
        assert!(updated.ends_with(
            "GRUB_CMDLINE_LINUX=\"rd.luks.ade.partuuid=abcd rd.luks.ade.bootuuid=1234\"\n"
        ));
    }

    #[test]
    fn legacy_grub_conf_test() {
        let grub_conf = "title CentOS (2.6.32-642.el6.x86_64)\n\troot (hd0,0)\n\tkernel /vmlinuz-2.6.32 ro root=UUID=1234 rd_NO_LUKS rd_NO_LVM\n\tinitrd /initramfs-2.6.32.img\n";
        let args = vec!["rd.luks.ade.partuuid=abcd".to_string()];
        let updated = super::patch_legacy_grub_conf(grub_conf, &args);
        assert!(!updated.contains("rd_NO_LUKS"));
        assert!(updated
            .contains("\tkernel /vmlinuz-2.6.32 ro root=UUID=1234 rd_NO_LVM rd.luks.ade.partuuid=abcd\n"));
        assert!(updated.contains("\tinitrd /initramfs-2.6.32.img\n"));
        assert_eq!(updated, super::patch_legacy_grub_conf(&updated, &args));
    }

    #[test]
    fn selinux_test() {
        let config = "# comment\nSELINUX=enforcing\nSELINUXTYPE=targeted\n";
        assert!(super::is_selinux_enforcing(config));
        let updated = super::set_selinux_permissive(config);
        assert_eq!("# comment\nSELINUX=permissive\nSELINUXTYPE=targeted\n", updated);
        assert!(!super::is_selinux_enforcing(&updated));
        assert!(!super::is_selinux_enforcing("SELINUX=disabled\n"));
    }

    #[test]
    fn edit_file_test() {
        let mut temp_test_path = env::temp_dir();
        temp_test_path.push("vm_encryption_edit_file_test");
        _ = fs::remove_dir_all(&temp_test_path);

        let file = temp_test_path.join("etc").join("crypttab");
        assert!(super::edit_file(&file, |c| super::append_line_once(c, "osencrypt a b")).unwrap());
        assert!(!super::edit_file(&file, |c| super::append_line_once(c, "osencrypt a b")).unwrap());
        assert_eq!("osencrypt a b\n", fs::read_to_string(&file).unwrap());

        _ = fs::remove_dir_all(&temp_test_path);
    }
}
