// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! The process logger of the extension binaries.
//!
//! The handler verbs and the encryption daemon are separate processes sharing one log folder,
//! each of them registers its own rolling file once at startup. Every line carries the id of
//! the process that wrote it. Lines up to the console level are printed as well; systemd and
//! the guest agent forward the console to syslog.

use super::rolling_logger::RollingLogger;
use crate::logger::LoggerLevel;
use std::process;

struct ProcessLogger {
    log_name: String,
    file_logger: RollingLogger,
    max_log_level: LoggerLevel,
    console_log_level: LoggerLevel,
}

static PROCESS_LOGGER: tokio::sync::OnceCell<ProcessLogger> =
    tokio::sync::OnceCell::const_new();

/// Registers the log file of the current process.
/// Only the first registration takes effect, returns whether this call made it.
pub fn set_process_logger(
    log_name: &str,
    file_logger: RollingLogger,
    max_log_level: LoggerLevel,
    console_log_level: LoggerLevel,
) -> bool {
    let logger = ProcessLogger {
        log_name: log_name.to_string(),
        file_logger,
        max_log_level,
        console_log_level,
    };
    if PROCESS_LOGGER.set(logger).is_ok() {
        return true;
    }
    write_console(
        LoggerLevel::Warn,
        &format!(
            "process logger already writes to '{}', ignoring '{log_name}'",
            process_log_name().unwrap_or_default()
        ),
    );
    false
}

pub fn process_log_name() -> Option<&'static str> {
    PROCESS_LOGGER.get().map(|logger| logger.log_name.as_str())
}

pub fn write_log(log_level: LoggerLevel, message: String) {
    let line = format!("[{}] {message}", process::id());
    let Some(logger) = PROCESS_LOGGER.get() else {
        // nothing is registered yet, the console is the only sink
        write_console(log_level, &line);
        return;
    };

    if log_level <= logger.console_log_level {
        write_console(log_level, &line);
    }
    if log_level <= logger.max_log_level {
        if let Err(e) = logger.file_logger.write(log_level, line) {
            eprintln!("Error writing to log {}: {e}", logger.log_name);
        }
    }
}

fn write_console(log_level: LoggerLevel, line: &str) {
    if log_level == LoggerLevel::Error {
        eprintln!("{line}");
    } else {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use crate::logger::rolling_logger::RollingLogger;
    use crate::logger::LoggerLevel;
    use crate::misc_helpers;
    use ctor::{ctor, dtor};
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::process;

    const TEST_LOG_NAME: &str = "logger_manager_test.log";

    fn get_temp_test_dir() -> PathBuf {
        env::temp_dir().join("vm_encryption_logger_manager_test")
    }

    #[ctor]
    fn setup() {
        let file_logger =
            RollingLogger::create_new(get_temp_test_dir(), TEST_LOG_NAME.to_string(), 200, 6);
        super::set_process_logger(
            TEST_LOG_NAME,
            file_logger,
            LoggerLevel::Info,
            LoggerLevel::Error,
        );
    }

    #[dtor]
    fn cleanup() {
        // clean up and ignore the clean up errors
        _ = fs::remove_dir_all(get_temp_test_dir());
    }

    #[test]
    fn process_logger_test() {
        assert_eq!(Some(TEST_LOG_NAME), super::process_log_name());

        // a second process name registered in the same process is ignored
        let daemon_dir = env::temp_dir().join("vm_encryption_logger_manager_daemon_test");
        let daemon_logger = RollingLogger::create_new(
            daemon_dir.clone(),
            "VMEncryptionDaemon.log".to_string(),
            200,
            6,
        );
        assert!(!super::set_process_logger(
            "VMEncryptionDaemon.log",
            daemon_logger,
            LoggerLevel::Trace,
            LoggerLevel::Trace,
        ));
        assert_eq!(Some(TEST_LOG_NAME), super::process_log_name());

        for _ in 0..20 {
            super::write_log(LoggerLevel::Debug, "debug line below the file level".to_string());
            super::write_log(LoggerLevel::Info, "encryption state machine started".to_string());
            super::write_log(LoggerLevel::Warn, "unmount /oldroot is busy".to_string());
        }
        assert!(!daemon_dir.exists());

        let log_files = misc_helpers::get_files(&get_temp_test_dir()).unwrap();
        assert_eq!(6, log_files.len(), "log file count mismatch");
        let content: String = log_files
            .iter()
            .map(|file| fs::read_to_string(file).unwrap())
            .collect();
        assert!(content.contains(&format!("[{}] unmount /oldroot is busy", process::id())));
        assert!(!content.contains("debug line below the file level"));
    }
}
