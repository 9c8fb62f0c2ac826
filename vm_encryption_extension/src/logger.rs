// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use std::path::Path;
use vm_encryption_shared::logger::{logger_manager, rolling_logger::RollingLogger, LoggerLevel};

const MAX_LOG_FILE_SIZE: u64 = 20 * 1024 * 1024;
const MAX_LOG_FILE_COUNT: u16 = 30;

/// `log_name` is the handler or the daemon log file, whichever process is starting.
pub fn init_logger(log_folder: &Path, log_name: &str) {
    let file_logger = RollingLogger::create_new(
        log_folder.to_path_buf(),
        log_name.to_string(),
        MAX_LOG_FILE_SIZE,
        MAX_LOG_FILE_COUNT,
    );
    // the console ends up in syslog, keep it to warnings and errors
    logger_manager::set_process_logger(
        log_name,
        file_logger,
        LoggerLevel::Trace,
        LoggerLevel::Warn,
    );
}

pub fn write(message: String) {
    logger_manager::write_log(LoggerLevel::Info, message);
}

pub fn write_warning(message: String) {
    logger_manager::write_log(LoggerLevel::Warn, message);
}

pub fn write_error(message: String) {
    logger_manager::write_log(LoggerLevel::Error, message);
}
