// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! Drives the states of the profile in order. A state is entered only once the state before
//! it has exited in the same run; its exit marker is what a relaunched process resumes from.

use super::context::{EncryptionEnvironment, HostCapability, OsEncryptionStateContext};
use super::encryption_state::EncryptionState;
use super::identity::OsDiskIdentity;
use super::state::{OsEncryptionState, StateOutcome};
use super::states;
use crate::constants;
use crate::error::Error;
use crate::logger;
use crate::result::Result;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use vm_encryption_shared::misc_helpers;

/// Result of evaluating the exit guard of the state before a transition.
#[derive(Debug)]
pub enum GuardResult {
    Proceed,
    Blocked(String),
    Error(Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineOutcome {
    Completed {
        reboot_required: bool,
    },
    /// The process must exit and be relaunched, it resumes after `after`.
    RestartRequested {
        after: EncryptionState,
        reason: String,
    },
    /// `state` has not exited yet. The next run drives it again.
    Blocked {
        state: EncryptionState,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn unmount_oldroot(environment: &EncryptionEnvironment) -> Self {
        RetryPolicy {
            max_attempts: environment.unmount_oldroot_max_attempts.max(1),
            delay: environment.unmount_oldroot_retry_delay(),
        }
    }
}

pub struct OsEncryptionStateMachine {
    context: Arc<OsEncryptionStateContext>,
    states: Vec<Box<dyn OsEncryptionState>>,
    resume_state: Option<Box<dyn OsEncryptionState>>,
    unmount_retry: RetryPolicy,
    current: EncryptionState,
}

impl OsEncryptionStateMachine {
    /// Resolves the OS disk from the live host and builds the states of the profile.
    pub fn new(context: Arc<OsEncryptionStateContext>) -> Result<Self> {
        let identity =
            OsDiskIdentity::resolve(&context.disk_util, &context.encryption_environment)?;
        let pipeline = states::build_pipeline(&context, &identity);
        let resume_state = if context.profile.has_resume_state() {
            states::build_state(EncryptionState::ResumeEncryption, &context, &identity)
        } else {
            None
        };
        let unmount_retry = RetryPolicy::unmount_oldroot(&context.encryption_environment);
        Ok(OsEncryptionStateMachine::with_states(
            context,
            pipeline,
            resume_state,
            unmount_retry,
        ))
    }

    pub fn with_states(
        context: Arc<OsEncryptionStateContext>,
        states: Vec<Box<dyn OsEncryptionState>>,
        resume_state: Option<Box<dyn OsEncryptionState>>,
        unmount_retry: RetryPolicy,
    ) -> Self {
        OsEncryptionStateMachine {
            context,
            states,
            resume_state,
            unmount_retry,
            current: EncryptionState::Uninitialized,
        }
    }

    pub fn current_state(&self) -> EncryptionState {
        self.current
    }

    fn set_current(&mut self, state: EncryptionState) {
        self.current = state;
        logger::write(format!("OS encryption state machine is in state {state}"));
    }

    pub fn start_encryption(&mut self) -> Result<MachineOutcome> {
        let mut capability = HostCapability::acquire(
            &self.context.encryption_environment.os_encryption_markers_path,
        )?;

        let mounts = self
            .context
            .command_executor
            .execute_or_fail("mount", &[])?;
        let mounts = mounts.stdout();
        if root_mounted_from_mapper(&mounts) {
            return self.resume_encryption(&mut capability);
        }
        if mounts.contains(constants::OS_MAPPER_PATH) {
            // e.g. left on /oldroot by an interrupted boot patch, the markers decide what is left
            logger::write(format!(
                "{} is mounted but the root is not, continuing the migration",
                constants::OS_MAPPER_PATH
            ));
        }

        for index in 0..self.states.len() {
            if index > 0 {
                if let Some(outcome) = self.check_exit_guard(index - 1)? {
                    return Ok(outcome);
                }
            }
            let state = self.states[index].state();
            self.set_current(state);
            let outcome = if state == EncryptionState::UnmountOldroot {
                self.enter_with_retry(index, &mut capability)?
            } else {
                self.states[index].enter(&mut capability)?
            };
            if let StateOutcome::RestartRequested { reason } = outcome {
                if let Some(outcome) = self.check_exit_guard(index)? {
                    return Ok(outcome);
                }
                logger::write(format!("state {state} requested a restart: {reason}"));
                return Ok(MachineOutcome::RestartRequested {
                    after: state,
                    reason,
                });
            }
        }
        if let Some(last) = self.states.len().checked_sub(1) {
            if let Some(outcome) = self.check_exit_guard(last)? {
                return Ok(outcome);
            }
        }

        let reboot_required = self
            .states
            .iter()
            .any(|state| state.state() == EncryptionState::PatchBootSystem);
        self.set_current(EncryptionState::Completed);
        Ok(MachineOutcome::Completed { reboot_required })
    }

    /// The root already runs from the encrypted mapper, so the VM booted through the patched
    /// initramfs. Only an interrupted re-encryption can be left to finish.
    fn resume_encryption(&mut self, capability: &mut HostCapability) -> Result<MachineOutcome> {
        let Some(mut state) = self.resume_state.take() else {
            logger::write(format!(
                "{} is already mounted, the OS disk is encrypted",
                constants::OS_MAPPER_PATH
            ));
            self.set_current(EncryptionState::Completed);
            return Ok(MachineOutcome::Completed {
                reboot_required: false,
            });
        };

        self.set_current(state.state());
        let result = state.enter(capability).and_then(|outcome| {
            match evaluate_exit_guard(state.as_mut()) {
                GuardResult::Proceed => Ok(Some(outcome)),
                GuardResult::Blocked(reason) => {
                    logger::write_warning(format!("state {} is blocked: {reason}", state.state()));
                    Ok(None)
                }
                GuardResult::Error(e) => Err(e),
            }
        });
        let resumed = state.state();
        self.resume_state = Some(state);

        match result? {
            None => Ok(MachineOutcome::Blocked {
                state: resumed,
                reason: format!("state {resumed} has not finished"),
            }),
            Some(StateOutcome::RestartRequested { reason }) => {
                Ok(MachineOutcome::RestartRequested {
                    after: resumed,
                    reason,
                })
            }
            Some(StateOutcome::Completed) => {
                self.set_current(EncryptionState::Completed);
                Ok(MachineOutcome::Completed {
                    reboot_required: false,
                })
            }
        }
    }

    /// Every failed attempt is reported with `UNMOUNT_OLDROOT_ERROR` before the next one.
    fn enter_with_retry(
        &mut self,
        index: usize,
        capability: &mut HostCapability,
    ) -> Result<StateOutcome> {
        let max_attempts = self.unmount_retry.max_attempts.max(1);
        let state = self.states[index].state();
        for attempt in 1..=max_attempts {
            match self.states[index].enter(capability) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    let message =
                        format!("state {state} failed on attempt {attempt}/{max_attempts}: {e}");
                    logger::write_warning(message.clone());
                    self.context.status_reporter.do_status_report(
                        constants::ENCRYPTION_OPERATION,
                        constants::TRANSITIONING_STATUS,
                        constants::UNMOUNT_OLDROOT_ERROR,
                        &message,
                    );
                    if attempt < max_attempts {
                        thread::sleep(self.unmount_retry.delay);
                    }
                }
            }
        }
        self.states[index].on_retries_exhausted()?;
        Err(Error::UnmountRetriesExhausted {
            path: misc_helpers::path_to_string(&self.context.encryption_environment.oldroot_path),
            attempts: max_attempts,
        })
    }

    fn check_exit_guard(&mut self, index: usize) -> Result<Option<MachineOutcome>> {
        let state = self.states[index].as_mut();
        match evaluate_exit_guard(state) {
            GuardResult::Proceed => Ok(None),
            GuardResult::Blocked(reason) => {
                logger::write_warning(format!("state {} is blocked: {reason}", state.state()));
                Ok(Some(MachineOutcome::Blocked {
                    state: state.state(),
                    reason,
                }))
            }
            GuardResult::Error(e) => Err(e),
        }
    }
}

/// Whether `mount` lists the encrypted mapper as the source of `/`.
fn root_mounted_from_mapper(mount_output: &str) -> bool {
    mount_output.lines().any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        fields.len() > 2
            && fields[0] == constants::OS_MAPPER_PATH
            && fields[1] == "on"
            && fields[2] == "/"
    })
}

pub fn evaluate_exit_guard(state: &mut dyn OsEncryptionState) -> GuardResult {
    match state.should_exit() {
        Ok(true) => GuardResult::Proceed,
        Ok(false) => GuardResult::Blocked(format!("state {} has not finished", state.state())),
        Err(e) => GuardResult::Error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::{MachineOutcome, OsEncryptionStateMachine, RetryPolicy};
    use crate::constants;
    use crate::error::Error;
    use crate::oscrypto::context::{HostCapability, OsEncryptionStateContext};
    use crate::oscrypto::distro::DistroFamily;
    use crate::oscrypto::encryption_state::EncryptionState;
    use crate::oscrypto::marker_store::MarkerStore;
    use crate::oscrypto::state::{OsEncryptionState, StateBase, StateOutcome};
    use crate::result::Result;
    use crate::test_mock::command_mock::MockCommandExecutor;
    use crate::test_mock::status_mock::MockStatusReporter;
    use crate::test_mock::test_host::{TestHost, BOOT_UUID, ROOT_UUID};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FakeState {
        base: StateBase,
        entered: Arc<Mutex<Vec<EncryptionState>>>,
        finishes: bool,
    }

    impl OsEncryptionState for FakeState {
        fn base(&self) -> &StateBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut StateBase {
            &mut self.base
        }

        fn apply(&mut self, _capability: &mut HostCapability) -> Result<StateOutcome> {
            self.entered.lock().unwrap().push(self.base.state);
            Ok(StateOutcome::Completed)
        }

        fn should_exit(&mut self) -> Result<bool> {
            if !self.finishes {
                return Ok(false);
            }
            self.base.should_exit()
        }
    }

    fn fake_states(
        host: &TestHost,
        entered: &Arc<Mutex<Vec<EncryptionState>>>,
        states: &[(EncryptionState, bool)],
    ) -> Vec<Box<dyn OsEncryptionState>> {
        states
            .iter()
            .map(|(state, finishes)| {
                Box::new(FakeState {
                    base: StateBase::new(*state, MarkerStore::new(&host.markers())),
                    entered: entered.clone(),
                    finishes: *finishes,
                }) as Box<dyn OsEncryptionState>
            })
            .collect()
    }

    fn no_retry_delay(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_secs(0),
        }
    }

    fn mock_boot_ids(executor: &MockCommandExecutor) {
        executor.on("blkid -s PARTUUID -o value /dev/sda2", 0, "1f2e3d4c-02\n");
        executor.on("blkid -s UUID -o value /dev/sda1", 0, &format!("{BOOT_UUID}\n"));
        executor.on(&format!("blkid -U {ROOT_UUID}"), 0, "/dev/sda2\n");
        executor.on(&format!("blkid -U {BOOT_UUID}"), 0, "/dev/sda1\n");
    }

    fn rhel72_context(
        host: &TestHost,
        executor: &Arc<MockCommandExecutor>,
        reporter: &Arc<MockStatusReporter>,
    ) -> Arc<OsEncryptionStateContext> {
        host.context(DistroFamily::Rhel72, executor.clone(), reporter.clone())
    }

    #[test]
    fn sequential_guard_test() {
        let host = TestHost::new("vm_encryption_machine_guard_test");
        let executor = Arc::new(MockCommandExecutor::new());
        let context = rhel72_context(&host, &executor, &Arc::new(MockStatusReporter::new()));
        let entered = Arc::new(Mutex::new(Vec::new()));

        let states = fake_states(
            &host,
            &entered,
            &[
                (EncryptionState::Prereq, false),
                (EncryptionState::Selinux, true),
            ],
        );
        let mut machine =
            OsEncryptionStateMachine::with_states(context.clone(), states, None, no_retry_delay(1));
        match machine.start_encryption().unwrap() {
            MachineOutcome::Blocked { state, .. } => assert_eq!(EncryptionState::Prereq, state),
            outcome => panic!("unexpected outcome {outcome:?}"),
        }
        assert_eq!(vec![EncryptionState::Prereq], *entered.lock().unwrap());
        assert_eq!(EncryptionState::Prereq, machine.current_state());

        let states = fake_states(
            &host,
            &entered,
            &[
                (EncryptionState::Prereq, true),
                (EncryptionState::Selinux, true),
            ],
        );
        let mut machine =
            OsEncryptionStateMachine::with_states(context, states, None, no_retry_delay(1));
        assert_eq!(
            MachineOutcome::Completed {
                reboot_required: false
            },
            machine.start_encryption().unwrap()
        );
        assert_eq!(
            vec![
                EncryptionState::Prereq,
                EncryptionState::Prereq,
                EncryptionState::Selinux
            ],
            *entered.lock().unwrap()
        );
        assert_eq!(EncryptionState::Completed, machine.current_state());
        let markers = MarkerStore::new(&host.markers());
        assert_eq!(
            Some(EncryptionState::Selinux),
            markers.latest().unwrap().map(|m| m.state)
        );
    }

    #[test]
    fn host_locked_test() {
        let host = TestHost::new("vm_encryption_machine_locked_test");
        let executor = Arc::new(MockCommandExecutor::new());
        let context = rhel72_context(&host, &executor, &Arc::new(MockStatusReporter::new()));
        let _capability = HostCapability::acquire(&host.markers()).unwrap();

        let mut machine = OsEncryptionStateMachine::new(context).unwrap();
        match machine.start_encryption() {
            Err(Error::HostLocked(_)) => {}
            other => panic!("unexpected result {other:?}"),
        }
        assert!(!executor.has_call("yum"));
    }

    #[test]
    fn unmount_retry_bound_test() {
        let host = TestHost::new("vm_encryption_machine_unmount_retry_test");
        host.write_mounts("none / tmpfs rw 0 0\n/dev/sda2 /oldroot xfs rw 0 0\n");
        let markers = MarkerStore::new(&host.markers());
        for state in [
            EncryptionState::Prereq,
            EncryptionState::Selinux,
            EncryptionState::Stripdown,
        ] {
            markers.record(state).unwrap();
        }
        let executor = Arc::new(MockCommandExecutor::new());
        executor.on_failure("umount /oldroot", 32, "umount: /oldroot: target is busy.");
        let reporter = Arc::new(MockStatusReporter::new());
        let context = rhel72_context(&host, &executor, &reporter);

        let mut machine = OsEncryptionStateMachine::new(context).unwrap();
        match machine.start_encryption() {
            Err(Error::UnmountRetriesExhausted { path, attempts }) => {
                assert_eq!("/oldroot", path);
                assert_eq!(3, attempts);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(3, executor.count("umount /oldroot"));
        assert_eq!(3, reporter.count_with_code(constants::UNMOUNT_OLDROOT_ERROR));
        assert!(!executor.has_call("luksFormat"));
        assert!(!markers.exists(EncryptionState::UnmountOldroot).unwrap());
        assert_eq!(EncryptionState::UnmountOldroot, machine.current_state());
    }

    #[test]
    fn scenario_fresh_rhel72_disk_test() {
        let host = TestHost::new("vm_encryption_machine_scenario_a_test");
        host.add_artifacts(DistroFamily::Rhel72);
        host.write_file(
            "usr/lib/systemd/system/waagent.service",
            "[Unit]\nDescription=Azure Linux Agent\n[Service]\nType=simple\n",
        );
        host.write_file("etc/default/grub", "GRUB_CMDLINE_LINUX=\"console=ttyS0\"\n");
        let executor = Arc::new(MockCommandExecutor::new());
        mock_boot_ids(&executor);
        executor.on_writes_file(
            "umount /oldroot",
            &host.root().join("proc/mounts"),
            "none / tmpfs rw 0 0\n",
        );
        let reporter = Arc::new(MockStatusReporter::new());

        // the stripdown pivot asks for a relaunch from the in-memory root
        let mut machine =
            OsEncryptionStateMachine::new(rhel72_context(&host, &executor, &reporter)).unwrap();
        match machine.start_encryption().unwrap() {
            MachineOutcome::RestartRequested { after, .. } => {
                assert_eq!(EncryptionState::Stripdown, after)
            }
            outcome => panic!("unexpected outcome {outcome:?}"),
        }
        host.write_mounts("none / tmpfs rw 0 0\n/dev/sda2 /oldroot xfs rw 0 0\n");

        let mut machine =
            OsEncryptionStateMachine::new(rhel72_context(&host, &executor, &reporter)).unwrap();
        assert_eq!(
            MachineOutcome::Completed {
                reboot_required: true
            },
            machine.start_encryption().unwrap()
        );

        let order = [
            "yum install",
            "pivot_root /tmp/tmproot /tmp/tmproot/oldroot",
            "fuser -m /oldroot",
            "cryptsetup luksFormat",
            "dd if=/dev/sda2 of=/dev/mapper/osencrypt",
            "pivot_root /oldroot /oldroot/memroot",
            "dracut -f -v",
            "pivot_root /memroot /memroot/oldroot",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|pattern| executor.position(pattern).unwrap())
            .collect();
        assert!(
            positions.windows(2).all(|w| w[0] < w[1]),
            "{:?}",
            executor.calls()
        );
        assert_eq!(1, executor.count("yum install"));
        assert_eq!(1, executor.count("fuser"));

        let crypttab = host.read_file("etc/crypttab");
        let entries: Vec<&str> = crypttab
            .lines()
            .filter(|line| line.starts_with("osencrypt "))
            .collect();
        assert_eq!(1, entries.len());
        assert!(entries[0].contains("PARTUUID=1f2e3d4c-02"));

        let markers = MarkerStore::new(&host.markers());
        let recorded: Vec<EncryptionState> = markers
            .list()
            .unwrap()
            .into_iter()
            .map(|m| m.state)
            .collect();
        assert_eq!(
            vec![
                EncryptionState::Prereq,
                EncryptionState::Selinux,
                EncryptionState::Stripdown,
                EncryptionState::UnmountOldroot,
                EncryptionState::EncryptBlockDevice,
                EncryptionState::PatchBootSystem,
            ],
            recorded
        );
        assert_eq!(EncryptionState::Completed, machine.current_state());
    }

    #[test]
    fn scenario_crash_after_unmount_test() {
        let host = TestHost::new("vm_encryption_machine_scenario_b_test");
        host.add_artifacts(DistroFamily::Rhel72);
        host.write_mounts("none / tmpfs rw 0 0\n");
        let markers = MarkerStore::new(&host.markers());
        for state in [
            EncryptionState::Prereq,
            EncryptionState::Selinux,
            EncryptionState::Stripdown,
            EncryptionState::UnmountOldroot,
        ] {
            markers.record(state).unwrap();
        }
        let executor = Arc::new(MockCommandExecutor::new());
        mock_boot_ids(&executor);
        let context = rhel72_context(&host, &executor, &Arc::new(MockStatusReporter::new()));

        let mut machine = OsEncryptionStateMachine::new(context.clone()).unwrap();
        let unmount = crate::oscrypto::states::build_state(
            EncryptionState::UnmountOldroot,
            &context,
            &crate::oscrypto::identity::OsDiskIdentity::resolve(
                &context.disk_util,
                &context.encryption_environment,
            )
            .unwrap(),
        )
        .unwrap();
        assert!(!unmount.should_enter().unwrap());

        assert_eq!(
            MachineOutcome::Completed {
                reboot_required: true
            },
            machine.start_encryption().unwrap()
        );
        assert!(!executor.has_call("yum"));
        assert!(!executor.has_call("pivot_root /tmp/tmproot"));
        assert!(!executor.has_call("fuser"));
        assert!(executor.has_call("cryptsetup luksFormat"));
        assert!(markers.exists(EncryptionState::EncryptBlockDevice).unwrap());
        assert!(markers.exists(EncryptionState::PatchBootSystem).unwrap());
    }

    #[test]
    fn scenario_already_encrypted_test() {
        let host = TestHost::new("vm_encryption_machine_scenario_c_test");
        host.write_mounts("/dev/mapper/osencrypt / xfs rw 0 0\n/dev/sda1 /boot xfs rw 0 0\n");
        host.write_file("boot/luks/osluksheader", "header");
        let executor = Arc::new(MockCommandExecutor::new());
        executor.on(
            "cryptsetup status osencrypt",
            0,
            "/dev/mapper/osencrypt is active and is in use.\n  device:  /dev/sda2\n",
        );
        executor.on_times("luksDump", 0, "Requirements: online-reencrypt\n", 1);
        executor.on(
            "mount",
            0,
            "/dev/mapper/osencrypt on / type xfs (rw,relatime)\n/dev/sda1 on /boot type xfs (rw)\n",
        );
        mock_boot_ids(&executor);
        let context = host.context(
            DistroFamily::Rhel81,
            executor.clone(),
            Arc::new(MockStatusReporter::new()),
        );

        let mut machine = OsEncryptionStateMachine::new(context).unwrap();
        assert_eq!(
            MachineOutcome::Completed {
                reboot_required: false
            },
            machine.start_encryption().unwrap()
        );
        assert_eq!(1, executor.count("reencrypt --resume-only"));
        assert!(!executor.has_call("yum"));
        assert!(!executor.has_call("dracut"));
        let markers = MarkerStore::new(&host.markers());
        assert!(markers.exists(EncryptionState::ResumeEncryption).unwrap());
        assert!(!markers.exists(EncryptionState::Prereq).unwrap());
        assert!(!markers.exists(EncryptionState::PatchBootSystem).unwrap());
    }

    #[test]
    fn mapper_on_oldroot_test() {
        let host = TestHost::new("vm_encryption_machine_mapper_on_oldroot_test");
        host.add_artifacts(DistroFamily::Rhel72);
        host.write_mounts("none / tmpfs rw 0 0\n/dev/mapper/osencrypt /oldroot xfs rw 0 0\n");
        let markers = MarkerStore::new(&host.markers());
        for state in [
            EncryptionState::Prereq,
            EncryptionState::Selinux,
            EncryptionState::Stripdown,
            EncryptionState::UnmountOldroot,
            EncryptionState::EncryptBlockDevice,
        ] {
            markers.record(state).unwrap();
        }
        let executor = Arc::new(MockCommandExecutor::new());
        executor.on(
            "cryptsetup status osencrypt",
            0,
            "/dev/mapper/osencrypt is active and is in use.\n  device:  /dev/sda2\n",
        );
        executor.on(
            "mount",
            0,
            "none on / type tmpfs (rw)\n/dev/mapper/osencrypt on /oldroot type xfs (rw)\n",
        );
        mock_boot_ids(&executor);
        let context = rhel72_context(&host, &executor, &Arc::new(MockStatusReporter::new()));

        // a failed boot patch left the mapper mounted, the boot patch must run again
        let mut machine = OsEncryptionStateMachine::new(context).unwrap();
        assert_eq!(
            MachineOutcome::Completed {
                reboot_required: true
            },
            machine.start_encryption().unwrap()
        );
        assert!(executor.has_call("dracut -f -v"));
        assert!(!executor.has_call("reencrypt --resume-only"));
        assert!(!executor.has_call("cryptsetup luksFormat"));
        assert!(!executor.has_call("dd if=/dev/sda2"));
        assert!(host.read_file("etc/crypttab").contains("osencrypt PARTUUID=1f2e3d4c-02"));
        assert!(markers.exists(EncryptionState::PatchBootSystem).unwrap());
    }

    #[test]
    fn root_mounted_from_mapper_test() {
        assert!(super::root_mounted_from_mapper(
            "sysfs on /sys type sysfs (rw)\n/dev/mapper/osencrypt on / type xfs (rw,relatime)\n"
        ));
        assert!(!super::root_mounted_from_mapper(
            "none on / type tmpfs (rw)\n/dev/mapper/osencrypt on /oldroot type xfs (rw)\n"
        ));
        assert!(!super::root_mounted_from_mapper(
            "/dev/mapper/osencrypt-old on / type xfs (rw)\n"
        ));
        assert!(!super::root_mounted_from_mapper(""));
    }

    #[test]
    fn already_encrypted_offline_test() {
        let host = TestHost::new("vm_encryption_machine_offline_encrypted_test");
        host.write_mounts("/dev/mapper/osencrypt / xfs rw 0 0\n");
        let executor = Arc::new(MockCommandExecutor::new());
        executor.on(
            "cryptsetup status osencrypt",
            0,
            "/dev/mapper/osencrypt is active and is in use.\n  device:  /dev/sda2\n",
        );
        executor.on("mount", 0, "/dev/mapper/osencrypt on / type xfs (rw,relatime)\n");
        mock_boot_ids(&executor);
        let context = rhel72_context(&host, &executor, &Arc::new(MockStatusReporter::new()));

        let mut machine = OsEncryptionStateMachine::new(context).unwrap();
        assert_eq!(
            MachineOutcome::Completed {
                reboot_required: false
            },
            machine.start_encryption().unwrap()
        );
        assert!(!executor.has_call("cryptsetup luks"));
        assert!(MarkerStore::new(&host.markers()).list().unwrap().is_empty());
    }
}
