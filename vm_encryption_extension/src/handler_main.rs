// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::args::Command;
use crate::command_executor::{CommandExecutor, ProcessCommandExecutor};
use crate::common;
use crate::constants;
use crate::logger;
use crate::oscrypto::context::EncryptionEnvironment;
use crate::oscrypto::distro::DistroProfile;
use crate::oscrypto::marker_store::MarkerStore;
use crate::result::Result;
use crate::settings;
use crate::structs;
use once_cell::sync::Lazy;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::Duration;
use sysinfo::{Pid, System};
use vm_encryption_shared::linux;
use vm_encryption_shared::misc_helpers;

const SYSTEMD_RUNTIME_FOLDER: &str = "/run/systemd/system";

static HANDLER_ENVIRONMENT: Lazy<Option<structs::HandlerEnvironment>> = Lazy::new(|| {
    let exe_path = misc_helpers::get_current_exe_dir();
    match common::get_handler_environment(&exe_path) {
        Ok(handler_environment) => Some(handler_environment),
        Err(e) => {
            eprintln!("Error in reading handler environment: {e}");
            None
        }
    }
});

pub fn program_start(command: Command, config_seq_no: Option<String>) {
    let handler_environment = match HANDLER_ENVIRONMENT.as_ref() {
        Some(handler_environment) => handler_environment,
        None => process::exit(constants::EXIT_CODE_HANDLERENV_ERR),
    };

    //Set up Logger instance
    logger::init_logger(
        Path::new(&handler_environment.logFolder),
        constants::HANDLER_LOG_FILE,
    );

    logger::write(format!(
        "VMEncryptionExt Version: {}, OS Arch: {}, OS Version: {}",
        misc_helpers::get_current_version(),
        misc_helpers::get_processor_arch(),
        misc_helpers::get_long_os_version()
    ));

    if !check_os_version_supported() {
        report_os_not_supported(handler_environment, &config_seq_no);
        process::exit(constants::EXIT_CODE_NOT_SUPPORTED_OS_VERSION);
    }

    handle_command(command, handler_environment, &config_seq_no);
}

fn check_os_version_supported() -> bool {
    check_linux_os_supported(&linux::get_os_type(), &linux::get_os_version())
}

fn check_linux_os_supported(os_type: &str, os_version: &str) -> bool {
    // the root volume layout does not matter for the support decision
    match DistroProfile::detect(os_type, os_version, false) {
        Ok(profile) => {
            logger::write(format!("OS '{os_type} {os_version}' maps to {}", profile.family));
            true
        }
        Err(e) => {
            logger::write(format!("OS '{os_type} {os_version}' is not supported: {e}"));
            false
        }
    }
}

fn report_os_not_supported(
    handler_environment: &structs::HandlerEnvironment,
    config_seq_no: &Option<String>,
) {
    // report to status folder if the os version is not supported
    let message = format!(
        "OS version not supported: {}",
        misc_helpers::get_long_os_version()
    );
    let status_obj = common::build_status_obj(
        "CheckOSVersionSupport",
        constants::ERROR_STATUS,
        constants::NOT_SUPPORTED_OS_VERSION,
        &message,
    );
    logger::write(message);
    common::report_status(
        Path::new(&handler_environment.statusFolder),
        config_seq_no,
        &status_obj,
    );
}

fn get_update_tag_file() -> PathBuf {
    get_exe_parent().join(constants::UPDATE_TAG_FILE)
}

fn update_tag_file_exists() -> bool {
    let update_tag_file = get_update_tag_file();
    if update_tag_file.exists() {
        logger::write(format!("update tag file exists: {:?}", update_tag_file));
        true
    } else {
        logger::write(format!(
            "update tag file does not exist: {:?}",
            update_tag_file
        ));
        false
    }
}

fn get_exe_parent() -> PathBuf {
    let exe_path = misc_helpers::get_current_exe_dir();
    let exe_parent = match exe_path.parent() {
        Some(parent) => parent.to_path_buf(),
        None => {
            logger::write("exe parent is None".to_string());
            PathBuf::new()
        }
    };
    logger::write(format!("exe parent: {:?}", exe_parent));
    exe_parent
}

fn handle_command(
    command: Command,
    handler_environment: &structs::HandlerEnvironment,
    config_seq_no: &Option<String>,
) {
    logger::write(format!("entering handle command: {command}"));
    match command {
        Command::Install => install_handler(),
        Command::Uninstall => uninstall_handler(),
        Command::Enable => enable_handler(handler_environment, config_seq_no),
        Command::Disable => disable_handler(),
        Command::Reset => reset_handler(),
        Command::Update => update_handler(),
        // the daemon never goes through the handler verbs
        Command::Daemon => {}
    }
}

fn install_handler() {
    logger::write("Installing Handler".to_string());
    match EncryptionEnvironment::load() {
        Ok(environment) => {
            if let Err(e) = misc_helpers::try_create_folder(&environment.encryption_config_path) {
                logger::write_error(format!("error in creating encryption config folder: {e}"));
            }
        }
        Err(e) => logger::write_error(format!("error in loading encryption config: {e}")),
    }
}

fn uninstall_handler() {
    logger::write("Uninstalling Handler".to_string());
    if !update_tag_file_exists() {
        // a real uninstall, not the old version going away during an update
        disable_handler();
    }
}

fn enable_handler(
    handler_environment: &structs::HandlerEnvironment,
    config_seq_no: &Option<String>,
) {
    let exe_path = misc_helpers::get_current_exe_dir();
    let status_folder = PathBuf::from(&handler_environment.statusFolder);
    let should_report_status = match common::update_current_seq_no(config_seq_no, &exe_path) {
        Ok(should_report_status) => should_report_status,
        Err(e) => {
            eprintln!("Error in updating current seq no: {e}");
            process::exit(constants::EXIT_CODE_NO_CONFIG_SEQ_NO);
        }
    };

    let seq_no = config_seq_no.clone().unwrap_or_default();
    if let Err(e) = settings::read_settings(Path::new(&handler_environment.configFolder), &seq_no) {
        logger::write_error(format!("invalid settings for seq no {seq_no}: {e}"));
        let status_obj = common::build_status_obj(
            constants::ENABLE_OPERATION,
            constants::ERROR_STATUS,
            e.status_code(),
            &e.to_string(),
        );
        common::report_status(&status_folder, config_seq_no, &status_obj);
        process::exit(constants::EXIT_CODE_INVALID_SETTINGS);
    }

    if should_report_status {
        common::report_status_enable_command(&status_folder, config_seq_no, None);
    }

    let mut count = 0;
    loop {
        if get_daemon_process().is_some() {
            logger::write("VMEncryptionExt daemon running".to_string());
            break;
        }
        if count > constants::DAEMON_START_RETRY_COUNT {
            common::report_status_enable_command(
                &status_folder,
                config_seq_no,
                Some(constants::ERROR_STATUS.to_string()),
            );
            process::exit(constants::EXIT_CODE_DAEMON_START_ERR);
        }
        let daemon_exe_path = exe_path.join(constants::EXTENSION_PROCESS_NAME);
        match launch_daemon(
            &ProcessCommandExecutor,
            &daemon_exe_path,
            Path::new(SYSTEMD_RUNTIME_FOLDER).exists(),
        ) {
            Ok(()) => break,
            Err(e) => logger::write_error(format!("error in starting the daemon: {e}")),
        }
        count += 1;
        thread::sleep(Duration::from_secs(15));
    }

    if update_tag_file_exists() {
        let update_tag_file = get_update_tag_file();
        match fs::remove_file(&update_tag_file) {
            Ok(_) => logger::write(format!("update tag file removed: {:?}", update_tag_file)),
            Err(e) => logger::write(format!("error in removing update tag file: {:?}", e)),
        }
    }
}

/// On systemd hosts the daemon runs as a transient unit that systemd relaunches
/// whenever it exits with [`constants::EXIT_CODE_RESTART_REQUESTED`].
fn launch_daemon(
    command_executor: &dyn CommandExecutor,
    daemon_exe_path: &Path,
    systemd: bool,
) -> Result<()> {
    let daemon_exe = misc_helpers::path_to_string(daemon_exe_path);
    if systemd {
        // a previous run of the transient unit may still be recorded as failed
        _ = command_executor.execute("systemctl", &["reset-failed", constants::DAEMON_UNIT_NAME]);
        let unit = format!("--unit={}", constants::DAEMON_UNIT_NAME);
        let restart_status = format!(
            "--property=RestartForceExitStatus={}",
            constants::EXIT_CODE_RESTART_REQUESTED
        );
        command_executor.execute_or_fail(
            "systemd-run",
            &[
                &unit,
                "--property=Restart=no",
                &restart_status,
                &daemon_exe,
                constants::DAEMON_ARG,
            ],
        )?;
        logger::write(format!(
            "VMEncryptionExt daemon started as unit {}",
            constants::DAEMON_UNIT_NAME
        ));
        return Ok(());
    }

    let child = process::Command::new(&daemon_exe)
        .arg(constants::DAEMON_ARG)
        .spawn()?;
    logger::write(format!("VMEncryptionExt daemon started with pid: {}", child.id()));
    Ok(())
}

fn is_daemon_command(cmd: &[String]) -> bool {
    cmd.iter().skip(1).any(|arg| arg == constants::DAEMON_ARG)
}

fn get_daemon_process() -> Option<Pid> {
    let mut system = System::new();
    system.refresh_processes();
    for p in system.processes_by_name(constants::EXTENSION_PROCESS_NAME) {
        let cmd = p.cmd();
        logger::write(format!("cmd: {:?}", cmd));
        if is_daemon_command(cmd) {
            logger::write(format!("VMEncryptionExt daemon running with pid: {}", p.pid()));
            return Some(p.pid());
        }
    }
    None
}

fn disable_handler() {
    logger::write("Disabling Handler".to_string());
    match get_daemon_process() {
        Some(pid) => match ProcessCommandExecutor.execute("kill", &["-9", &pid.to_string()]) {
            Ok(output) => logger::write(format!(
                "kill VMEncryptionExt daemon: result: {}",
                output.message()
            )),
            Err(e) => logger::write_error(format!("error in killing the daemon: {e}")),
        },
        None => {
            logger::write("VMEncryptionExt daemon not running".to_string());
        }
    }
}

fn reset_handler() {
    let exe_path = misc_helpers::get_current_exe_dir();
    let markers = match EncryptionEnvironment::load() {
        Ok(environment) => Some(MarkerStore::new(&environment.os_encryption_markers_path)),
        Err(e) => {
            logger::write_error(format!("error in loading encryption config: {e}"));
            None
        }
    };
    reset_state(&exe_path, &get_update_tag_file(), markers.as_ref());
}

fn reset_state(exe_path: &Path, update_tag_file: &Path, markers: Option<&MarkerStore>) {
    let seq_no_file = exe_path.join(constants::CURRENT_SEQ_NO_FILE);
    match fs::remove_file(update_tag_file) {
        Ok(_) => logger::write(format!("update tag file removed: {:?}", update_tag_file)),
        Err(e) => logger::write(format!("error in removing update tag file: {:?}", e)),
    }
    match fs::remove_file(&seq_no_file) {
        Ok(_) => logger::write(format!("seq no file removed: {:?}", seq_no_file)),
        Err(e) => logger::write(format!("error in removing seq no file: {:?}", e)),
    }
    if let Some(markers) = markers {
        match markers.reset_if_finished() {
            Ok(true) => logger::write("OS encryption markers cleared".to_string()),
            Ok(false) => logger::write("OS encryption markers kept".to_string()),
            Err(e) => logger::write_error(format!("error in clearing OS encryption markers: {e}")),
        }
    }
}

fn update_handler() {
    match std::env::var("VERSION") {
        Ok(version) => logger::write(format!("updating to version {version}")),
        Err(e) => {
            logger::write(format!("error in getting VERSION from env::var: {:?}", e));
            process::exit(constants::EXIT_CODE_UPDATE_TO_VERSION_ENV_VAR_NOTFOUND);
        }
    }

    let update_tag_file = get_update_tag_file();
    let mut count = 0;
    loop {
        if count > constants::DAEMON_START_RETRY_COUNT {
            logger::write(format!(
                "update tag file retry count exceeded: {}",
                constants::DAEMON_START_RETRY_COUNT
            ));
            break;
        }
        match fs::write(&update_tag_file, misc_helpers::get_date_time_string()) {
            Ok(_) => {
                logger::write(format!("update tag file created: {:?}", update_tag_file));
                break;
            }
            Err(e) => {
                logger::write(format!("error in creating update tag file: {:?}", e));
            }
        }
        count += 1;
        thread::sleep(Duration::from_secs(15));
    }
}

#[cfg(test)]
mod tests {
    use crate::oscrypto::encryption_state::EncryptionState;
    use crate::oscrypto::marker_store::MarkerStore;
    use crate::test_mock::command_mock::MockCommandExecutor;
    use std::env;
    use std::fs;
    use std::path::Path;

    #[test]
    fn test_check_os_supported() {
        assert!(super::check_linux_os_supported("Ubuntu", "20.04"));
        assert!(super::check_linux_os_supported("Ubuntu", "16.04"));
        assert!(super::check_linux_os_supported("CentOS", "7.5"));
        assert!(super::check_linux_os_supported("Redhat", "8.1"));
        assert!(super::check_linux_os_supported("Mariner", "1.0"));
        assert!(!super::check_linux_os_supported("Ubuntu", "14.04"));
        assert!(!super::check_linux_os_supported("Debian", "11"));
        assert!(!super::check_linux_os_supported("Ubuntu", "Rolling Release"));
    }

    #[test]
    fn test_is_daemon_command() {
        let cmd = |args: &[&str]| args.iter().map(|a| a.to_string()).collect::<Vec<String>>();
        assert!(super::is_daemon_command(&cmd(&[
            "/var/lib/waagent/ade/VMEncryptionExt",
            "daemon"
        ])));
        assert!(!super::is_daemon_command(&cmd(&[
            "/var/lib/waagent/ade/VMEncryptionExt",
            "enable"
        ])));
        assert!(!super::is_daemon_command(&cmd(&["daemon"])));
        assert!(!super::is_daemon_command(&[]));
    }

    #[test]
    fn test_launch_daemon_with_systemd() {
        let executor = MockCommandExecutor::new();
        super::launch_daemon(
            &executor,
            Path::new("/var/lib/waagent/ade/VMEncryptionExt"),
            true,
        )
        .unwrap();
        assert_eq!(
            vec![
                "systemctl reset-failed azure-disk-encryption-daemon".to_string(),
                "systemd-run --unit=azure-disk-encryption-daemon --property=Restart=no --property=RestartForceExitStatus=18 /var/lib/waagent/ade/VMEncryptionExt daemon".to_string(),
            ],
            executor.calls()
        );

        executor.on_failure("systemd-run", 1, "Unit azure-disk-encryption-daemon.service already exists.");
        assert!(super::launch_daemon(
            &executor,
            Path::new("/var/lib/waagent/ade/VMEncryptionExt"),
            true,
        )
        .is_err());
    }

    #[test]
    fn test_reset_state() {
        let mut temp_test_path = env::temp_dir();
        temp_test_path.push("vm_encryption_test_reset_state");
        _ = fs::remove_dir_all(&temp_test_path);
        fs::create_dir_all(&temp_test_path).unwrap();

        let update_tag_file = temp_test_path.join("update.tag");
        let seq_no_file = temp_test_path.join("current_seq_no.txt");
        let markers = MarkerStore::new(&temp_test_path.join("markers"));

        // a partially migrated disk keeps its markers
        fs::write(&update_tag_file, "tag").unwrap();
        fs::write(&seq_no_file, "3").unwrap();
        markers.record(EncryptionState::Prereq).unwrap();
        markers.record(EncryptionState::Stripdown).unwrap();
        super::reset_state(&temp_test_path, &update_tag_file, Some(&markers));
        assert!(!update_tag_file.exists());
        assert!(!seq_no_file.exists());
        assert!(markers.exists(EncryptionState::Stripdown).unwrap());

        // a finished migration is cleared
        markers.record(EncryptionState::PatchBootSystem).unwrap();
        super::reset_state(&temp_test_path, &update_tag_file, Some(&markers));
        assert!(markers.list().unwrap().is_empty());

        _ = fs::remove_dir_all(&temp_test_path);
    }
}
