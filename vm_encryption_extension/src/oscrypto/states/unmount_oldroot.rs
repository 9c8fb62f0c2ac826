// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::logger;
use crate::oscrypto::context::{HostCapability, OsEncryptionStateContext};
use crate::oscrypto::distro::DistroFamily;
use crate::oscrypto::identity::OsDiskIdentity;
use crate::oscrypto::state::{OsEncryptionState, StateBase, StateOutcome};
use crate::result::Result;
use std::process;
use std::sync::Arc;
use vm_encryption_shared::misc_helpers;

/// Detaches the OS disk root from `/oldroot`. Every process still holding it open is killed,
/// except this one and init. The machine retries this state a bounded number of times.
pub struct UnmountOldrootState {
    base: StateBase,
    context: Arc<OsEncryptionStateContext>,
    identity: OsDiskIdentity,
}

impl UnmountOldrootState {
    pub fn new(
        base: StateBase,
        context: Arc<OsEncryptionStateContext>,
        identity: OsDiskIdentity,
    ) -> Self {
        UnmountOldrootState {
            base,
            context,
            identity,
        }
    }

    fn oldroot(&self) -> String {
        misc_helpers::path_to_string(&self.context.encryption_environment.oldroot_path)
    }

    /// Re-executes init from the in-memory root so it drops its references to the OS disk.
    fn reexec_init(&self) -> Result<()> {
        let executor = &self.context.command_executor;
        let output = if self.context.profile.family == DistroFamily::CentOs68 {
            executor.execute("telinit", &["u"])?
        } else {
            executor.execute("systemctl", &["daemon-reexec"])?
        };
        if !output.is_success() {
            logger::write_warning(format!("failed to re-execute init: {}", output.message()));
        }
        Ok(())
    }

    fn kill_oldroot_users(&self, oldroot: &str) -> Result<()> {
        let executor = &self.context.command_executor;
        let output = executor.execute("fuser", &["-m", oldroot])?;
        let own_pid = process::id();
        for pid in parse_fuser_pids(&output.stdout()) {
            if pid == own_pid || pid == 1 {
                continue;
            }
            let pid = pid.to_string();
            logger::write(format!("killing process {pid} holding {oldroot}"));
            executor.execute("kill", &["-9", pid.as_str()])?;
        }
        Ok(())
    }
}

impl OsEncryptionState for UnmountOldrootState {
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
        let oldroot = self.oldroot();
        if !self.context.disk_util.is_mounted(&oldroot)? {
            logger::write(format!("{oldroot} is not mounted"));
            return Ok(false);
        }
        Ok(true)
    }

    fn apply(&mut self, _capability: &mut HostCapability) -> Result<StateOutcome> {
        self.context.report_transitioning("Entering unmount oldroot state");
        let oldroot = self.oldroot();
        let disk_util = &self.context.disk_util;

        self.reexec_init()?;
        self.kill_oldroot_users(&oldroot)?;

        let mut submounts: Vec<String> = disk_util
            .get_mount_items()?
            .into_iter()
            .map(|item| item.dest)
            .filter(|dest| dest.starts_with(&format!("{oldroot}/")))
            .collect();
        submounts.sort();
        submounts.dedup();
        // deepest first
        submounts.sort_by_key(|dest| std::cmp::Reverse(dest.matches('/').count()));
        for submount in submounts {
            disk_util.umount(&submount)?;
        }
        disk_util.umount(&oldroot)?;
        logger::write(format!("unmounted {oldroot}"));

        if self.identity.rootfs_fstype.starts_with("ext") {
            let output = self
                .context
                .command_executor
                .execute("e2fsck", &["-yf", self.identity.rootfs_sdx_path.as_str()])?;
            // 1 means errors were corrected
            if output.exit_code() > 1 {
                logger::write_warning(format!("e2fsck reported: {}", output.message()));
            }
        }
        Ok(StateOutcome::Completed)
    }

    fn should_exit(&mut self) -> Result<bool> {
        if !self.base.markers.exists(self.base.state)? {
            let oldroot = self.oldroot();
            if self.context.disk_util.is_mounted(&oldroot)? {
                logger::write(format!("{oldroot} is still mounted"));
                return Ok(false);
            }
        }
        self.base.should_exit()
    }

    fn on_retries_exhausted(&mut self) -> Result<()> {
        if self.context.profile.clear_unmount_marker_on_exhaustion {
            logger::write_warning(
                "clearing the unmount oldroot marker so the next run unmounts again".to_string(),
            );
            self.base.markers.clear(self.base.state)?;
            self.base.state_executed = false;
        }
        Ok(())
    }
}

/// `fuser` writes the pids to stdout, each followed by access letters that go to stderr.
fn parse_fuser_pids(output: &str) -> Vec<u32> {
    output
        .split_whitespace()
        .filter_map(|token| {
            let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::UnmountOldrootState;
    use crate::oscrypto::context::HostCapability;
    use crate::oscrypto::distro::DistroFamily;
    use crate::oscrypto::encryption_state::EncryptionState;
    use crate::oscrypto::identity::OsDiskIdentity;
    use crate::oscrypto::marker_store::MarkerStore;
    use crate::oscrypto::state::{OsEncryptionState, StateBase};
    use crate::test_mock::command_mock::MockCommandExecutor;
    use crate::test_mock::status_mock::MockStatusReporter;
    use crate::test_mock::test_host::TestHost;
    use std::sync::Arc;

    fn identity(fstype: &str) -> OsDiskIdentity {
        OsDiskIdentity {
            rootfs_block_device: "/dev/sda2".to_string(),
            rootfs_sdx_path: "/dev/sda2".to_string(),
            bootfs_block_device: Some("/dev/sda1".to_string()),
            rootfs_disk: "/dev/sda".to_string(),
            rootfs_fstype: fstype.to_string(),
            is_lvm: false,
            is_pivoted: true,
        }
    }

    #[test]
    fn parse_fuser_pids_test() {
        assert_eq!(
            vec![1, 812, 1043],
            super::parse_fuser_pids(" 1rce   812c  1043m")
        );
        assert!(super::parse_fuser_pids("").is_empty());
    }

    #[test]
    fn unmount_test() {
        let host = TestHost::new("vm_encryption_unmount_oldroot_test");
        let pivoted = "none / tmpfs rw 0 0\n/dev/sda2 /oldroot ext4 rw 0 0\n/dev/sdb1 /oldroot/mnt/resource ext4 rw 0 0\nproc /oldroot/proc proc rw 0 0\n";
        host.write_mounts(pivoted);
        let executor = Arc::new(MockCommandExecutor::new());
        executor.on("fuser -m /oldroot", 0, " 1rce  4242c");
        executor.on_writes_file(
            "umount /oldroot",
            &host.root().join("proc/mounts"),
            "none / tmpfs rw 0 0\n",
        );
        let context = host.context(
            DistroFamily::CentOs68,
            executor.clone(),
            Arc::new(MockStatusReporter::new()),
        );
        let mut state = UnmountOldrootState::new(
            StateBase::new(EncryptionState::UnmountOldroot, MarkerStore::new(&host.markers())),
            context,
            identity("ext4"),
        );
        let mut capability = HostCapability::acquire(&host.markers()).unwrap();

        assert!(state.should_enter().unwrap());
        state.enter(&mut capability).unwrap();
        assert!(executor.has_call("telinit u"));
        assert!(executor.has_call("kill -9 4242"));
        assert!(!executor.has_call("kill -9 1"));
        assert_eq!(Some(3), executor.position("umount /oldroot/mnt/resource"));
        assert!(executor.has_call("e2fsck -yf /dev/sda2"));
        assert!(state.should_exit().unwrap());
        assert!(MarkerStore::new(&host.markers())
            .exists(EncryptionState::UnmountOldroot)
            .unwrap());
    }

    #[test]
    fn still_mounted_and_exhausted_test() {
        let host = TestHost::new("vm_encryption_unmount_oldroot_busy_test");
        host.write_mounts("none / tmpfs rw 0 0\n/dev/sda2 /oldroot xfs rw 0 0\n");
        let executor = Arc::new(MockCommandExecutor::new());
        let context = host.context(
            DistroFamily::CentOs68,
            executor.clone(),
            Arc::new(MockStatusReporter::new()),
        );
        let markers = MarkerStore::new(&host.markers());
        let mut state = UnmountOldrootState::new(
            StateBase::new(EncryptionState::UnmountOldroot, markers.clone()),
            context,
            identity("xfs"),
        );
        assert!(!state.should_exit().unwrap());
        assert!(!markers.exists(EncryptionState::UnmountOldroot).unwrap());

        // a marker recorded by an earlier run is dropped once the retries are spent
        markers.record(EncryptionState::UnmountOldroot).unwrap();
        state.base_mut().state_executed = true;
        assert!(!state.should_enter().unwrap());
        state.on_retries_exhausted().unwrap();
        assert!(!markers.exists(EncryptionState::UnmountOldroot).unwrap());
        assert!(state.should_enter().unwrap());
    }
}
