// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! The long running encryption process launched by `enable`.
//!
//! Its exit code is the contract with the supervisor: [`constants::EXIT_CODE_RESTART_REQUESTED`]
//! asks to be launched again, every other code is final for the current sequence number.

use crate::command_executor::{CommandExecutor, ProcessCommandExecutor};
use crate::common::{self, HandlerStatusReporter, StatusReporter};
use crate::constants;
use crate::disk_util::DiskUtil;
use crate::error::Error;
use crate::logger;
use crate::online_encryption::OnlineEncryptionResumer;
use crate::oscrypto::context::{EncryptionConfig, EncryptionEnvironment, OsEncryptionStateContext};
use crate::oscrypto::distro::DistroProfile;
use crate::oscrypto::state_machine::{MachineOutcome, OsEncryptionStateMachine};
use crate::result::Result;
use crate::settings::{self, VolumeType};
use crate::structs::{FormattedMessage, HandlerEnvironment, HeartbeatObj};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vm_encryption_shared::misc_helpers;

pub fn start_daemon() -> i32 {
    let exe_path = misc_helpers::get_current_exe_dir();
    let handler_environment = match common::get_handler_environment(&exe_path) {
        Ok(handler_environment) => handler_environment,
        Err(e) => {
            eprintln!("Error in reading handler environment: {e}");
            return constants::EXIT_CODE_HANDLERENV_ERR;
        }
    };
    logger::init_logger(
        Path::new(&handler_environment.logFolder),
        constants::DAEMON_LOG_FILE,
    );
    logger::write(format!(
        "VMEncryptionExt daemon Version: {}, OS Arch: {}, OS Version: {}",
        misc_helpers::get_current_version(),
        misc_helpers::get_processor_arch(),
        misc_helpers::get_long_os_version()
    ));

    common::report_heartbeat(
        Path::new(&handler_environment.heartbeatFile),
        HeartbeatObj {
            status: constants::HEARTBEAT_READY_STATUS.to_string(),
            code: constants::STATUS_CODE_OK.to_string(),
            formattedMessage: FormattedMessage {
                lang: constants::LANG_EN_US.to_string(),
                message: "Azure Disk Encryption daemon is running".to_string(),
            },
        },
    );

    let config_seq_no = common::get_current_seq_no(&exe_path);
    let status_reporter: Arc<dyn StatusReporter> = Arc::new(HandlerStatusReporter::new(
        PathBuf::from(&handler_environment.statusFolder),
        Some(config_seq_no.clone()),
    ));
    let exit_code = match run(&handler_environment, &config_seq_no, status_reporter.clone()) {
        Ok(exit_code) => exit_code,
        Err(e) => report_failure(status_reporter.as_ref(), &e),
    };
    logger::write(format!("VMEncryptionExt daemon exiting with code {exit_code}"));
    exit_code
}

fn run(
    handler_environment: &HandlerEnvironment,
    config_seq_no: &str,
    status_reporter: Arc<dyn StatusReporter>,
) -> Result<i32> {
    if config_seq_no.is_empty() {
        return Err(Error::InvalidSettings(
            "no configuration sequence number recorded by enable".to_string(),
        ));
    }
    let settings = settings::read_settings(
        Path::new(&handler_environment.configFolder),
        config_seq_no,
    )?;
    logger::write(format!(
        "encrypting VolumeType {} with passphrase file '{}'",
        settings.volume_type, settings.passphrase_file_name
    ));

    let encryption_environment = EncryptionEnvironment::load()?;
    let command_executor: Arc<dyn CommandExecutor> = Arc::new(ProcessCommandExecutor);
    let profile = DistroProfile::from_host(&DiskUtil::new(
        command_executor.clone(),
        encryption_environment.clone(),
    ))?;
    let context = Arc::new(OsEncryptionStateContext::new(
        encryption_environment,
        EncryptionConfig::from_settings(&settings),
        profile,
        command_executor,
        status_reporter,
    ));
    run_encryption(context, settings.volume_type)
}

pub fn run_encryption(
    context: Arc<OsEncryptionStateContext>,
    volume_type: VolumeType,
) -> Result<i32> {
    if volume_type.includes_data() {
        let resumed = OnlineEncryptionResumer::new(context.clone()).begin_resume()?;
        logger::write(format!("resumed re-encryption of {resumed} data volume(s)"));
    }
    if !volume_type.includes_os() {
        context.status_reporter.do_status_report(
            constants::ENCRYPTION_OPERATION,
            constants::SUCCESS_STATUS,
            constants::STATUS_CODE_OK,
            "Data volume encryption is up to date",
        );
        return Ok(0);
    }

    let mut machine = OsEncryptionStateMachine::new(context.clone())?;
    let outcome = machine.start_encryption()?;
    logger::write(format!(
        "OS encryption state machine stopped in state {} with {outcome:?}",
        machine.current_state()
    ));
    handle_outcome(&context, outcome)
}

pub fn handle_outcome(context: &OsEncryptionStateContext, outcome: MachineOutcome) -> Result<i32> {
    match outcome {
        MachineOutcome::Completed {
            reboot_required: false,
        } => {
            context.status_reporter.do_status_report(
                constants::ENCRYPTION_OPERATION,
                constants::SUCCESS_STATUS,
                constants::STATUS_CODE_OK,
                "OS disk encryption completed",
            );
            if let Err(e) = context
                .bek_util
                .umount_azure_passhprase(&context.encryption_config, false)
            {
                logger::write_warning(format!("failed to unmount the BEK volume: {e}"));
            }
            Ok(0)
        }
        MachineOutcome::Completed {
            reboot_required: true,
        } => {
            context.report_transitioning("rebooting into encrypted OS volume");
            context.command_executor.execute_or_fail("sync", &[])?;
            context.command_executor.execute_or_fail("reboot", &[])?;
            Ok(0)
        }
        MachineOutcome::RestartRequested { after, reason } => {
            context.report_transitioning(&format!("restarting after {after}: {reason}"));
            Ok(constants::EXIT_CODE_RESTART_REQUESTED)
        }
        MachineOutcome::Blocked { state, reason } => {
            context.report_transitioning(&format!("{state} has not completed: {reason}"));
            Ok(0)
        }
    }
}

pub fn exit_code_for_error(error: &Error) -> i32 {
    match error {
        Error::HostLocked(_) => constants::EXIT_CODE_HOST_LOCKED,
        Error::InvalidSettings(_) => constants::EXIT_CODE_INVALID_SETTINGS,
        Error::UnsupportedDistro(_) => constants::EXIT_CODE_NOT_SUPPORTED_OS_VERSION,
        _ => constants::EXIT_CODE_ENCRYPTION_FAILED,
    }
}

fn report_failure(status_reporter: &dyn StatusReporter, error: &Error) -> i32 {
    logger::write_error(format!("encryption failed: {error}"));
    status_reporter.do_status_report(
        constants::ENCRYPTION_OPERATION,
        constants::ERROR_STATUS,
        error.status_code(),
        &error.to_string(),
    );
    exit_code_for_error(error)
}
