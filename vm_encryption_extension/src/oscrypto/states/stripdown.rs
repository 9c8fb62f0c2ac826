// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::logger;
use crate::oscrypto::context::{HostCapability, OsEncryptionStateContext};
use crate::oscrypto::state::{OsEncryptionState, StateBase, StateOutcome};
use crate::result::Result;
use std::sync::Arc;
use vm_encryption_shared::misc_helpers;

/// Top level folders copied into the in-memory root.
const COPIED_FOLDERS: [&str; 9] = [
    "bin", "sbin", "lib", "lib64", "etc", "root", "usr", "var", "mnt",
];
/// Mount points carried over from the OS disk root.
const MOVED_MOUNTS: [&str; 4] = ["dev", "proc", "sys", "run"];

/// Copies the running system into a tmpfs and pivots into it, so the OS disk root
/// ends up on `/oldroot` and can be unmounted.
pub struct StripdownState {
    base: StateBase,
    context: Arc<OsEncryptionStateContext>,
}

impl StripdownState {
    pub fn new(base: StateBase, context: Arc<OsEncryptionStateContext>) -> Self {
        StripdownState { base, context }
    }
}

impl OsEncryptionState for StripdownState {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StateBase {
        &mut self.base
    }

    fn should_enter(&self) -> Result<bool> {
        if !self.base.should_enter()? {
            return Ok(false);
        }
        if self.context.disk_util.is_root_in_memory()? {
            logger::write("root is already in memory".to_string());
            return Ok(false);
        }
        Ok(true)
    }

    fn apply(&mut self, _capability: &mut HostCapability) -> Result<StateOutcome> {
        self.context.report_transitioning("Entering stripdown state");

        let disk_util = &self.context.disk_util;
        let environment = &self.context.encryption_environment;
        let tmproot = misc_helpers::path_to_string(&environment.tmproot_path);
        let oldroot = misc_helpers::path_to_string(&environment.oldroot_path);

        disk_util.make_dirs(&[tmproot.as_str()])?;
        if !disk_util.is_mounted(&tmproot)? {
            disk_util.mount("none", &tmproot, Some("tmpfs"))?;
        }

        for folder in COPIED_FOLDERS {
            let source = format!("/{folder}");
            if !self.context.host_path(&source).try_exists()? {
                continue;
            }
            let dest = format!("{tmproot}/");
            self.context
                .command_executor
                .execute_or_fail("cp", &["-ax", source.as_str(), dest.as_str()])?;
        }

        let mut new_dirs: Vec<String> = MOVED_MOUNTS
            .iter()
            .map(|dir| format!("{tmproot}/{dir}"))
            .collect();
        new_dirs.push(format!("{tmproot}{oldroot}"));
        new_dirs.push(format!("{tmproot}/tmp"));
        new_dirs.push(format!("{tmproot}/boot"));
        let new_dirs: Vec<&str> = new_dirs.iter().map(|d| d.as_str()).collect();
        disk_util.make_dirs(&new_dirs)?;

        disk_util.make_rprivate("/")?;
        disk_util.pivot_root(&tmproot, &format!("{tmproot}{oldroot}"))?;
        for dir in MOVED_MOUNTS {
            disk_util.move_mount(&format!("{oldroot}/{dir}"), &format!("/{dir}"))?;
        }
        logger::write(format!("pivoted into the in-memory root, OS disk root is on {oldroot}"));

        if self.context.profile.restart_agent_after_stripdown {
            return Ok(StateOutcome::RestartRequested {
                reason: "the daemon must run from the in-memory root".to_string(),
            });
        }
        Ok(StateOutcome::Completed)
    }
}
