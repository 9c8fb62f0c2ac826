// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::constants;
use crate::error::Error;
use crate::logger;
use crate::result::Result;
use crate::structs::{self, FormattedMessage, HandlerEnvironment, TopLevelStatus};
use std::fs;
use std::path::{Path, PathBuf};
use vm_encryption_shared::misc_helpers;

pub fn get_handler_environment(exe_path: &Path) -> Result<HandlerEnvironment> {
    let handler_env_path = exe_path.join(constants::HANDLER_ENVIRONMENT_FILE);
    let handler_env_file: Vec<structs::Handler> =
        misc_helpers::json_read_from_file(&handler_env_path)?;
    match handler_env_file.first() {
        Some(handler) => Ok(handler.handlerEnvironment.clone()),
        None => Err(Error::InvalidSettings(
            "Handler environment file is empty".to_string(),
        )),
    }
}

pub fn report_heartbeat(heartbeat_file_path: &Path, heartbeat_obj: structs::HeartbeatObj) {
    let root_obj = vec![structs::TopLevelHeartbeat {
        version: constants::VERSION.to_string(),
        heartbeat: heartbeat_obj,
    }];
    let root_heartbeat = match serde_json::to_string(&root_obj) {
        Ok(temp) => temp,
        Err(e) => {
            logger::write_error(format!("Error in serializing heartbeat object: {e}"));
            return;
        }
    };
    match fs::write(heartbeat_file_path, root_heartbeat) {
        Ok(_) => {
            logger::write(format!("HeartBeat file created: {:?}", heartbeat_file_path));
        }
        Err(e) => {
            logger::write_error(format!("Error in creating HeartBeat file: {:?}", e));
        }
    }
}

pub fn get_file_path(
    status_folder: &Path,
    config_seq_no: &Option<String>,
    file_extension: &str,
) -> PathBuf {
    let mut file: PathBuf = status_folder.to_path_buf();
    _ = misc_helpers::try_create_folder(&file);
    match config_seq_no {
        Some(config_seq_no) => {
            file.push(config_seq_no);
        }
        None => {
            file.push("");
        }
    }
    file.set_extension(file_extension);
    file
}

pub fn report_status(
    status_folder_path: &Path,
    config_seq_no: &Option<String>,
    status_obj: &structs::StatusObj,
) {
    let status_file = get_file_path(
        status_folder_path,
        config_seq_no,
        constants::STATUS_FILE_SUFFIX,
    );

    let root_vec = vec![TopLevelStatus {
        version: constants::VERSION.to_string(),
        timestampUTC: misc_helpers::get_date_time_string_with_milliseconds(),
        status: status_obj.clone(),
    }];
    let root_status = match serde_json::to_string(&root_vec) {
        Ok(temp) => temp,
        Err(e) => {
            logger::write_error(format!("Error in serializing status object: {e}"));
            return;
        }
    };
    // the control plane polls this file, it must never be seen half written
    match misc_helpers::write_file_atomically(&status_file, root_status.as_bytes()) {
        Ok(_) => {
            logger::write(format!("Status file created: {:?}", status_file));
        }
        Err(e) => {
            logger::write_error(format!("Error in creating status file: {e}"));
        }
    }
}

pub fn build_status_obj(
    operation: &str,
    status: &str,
    code: i32,
    message: &str,
) -> structs::StatusObj {
    structs::StatusObj {
        name: constants::PLUGIN_NAME.to_string(),
        operation: operation.to_string(),
        configurationAppliedTime: misc_helpers::get_date_time_string(),
        code,
        status: status.to_string(),
        formattedMessage: FormattedMessage {
            lang: constants::LANG_EN_US.to_string(),
            message: message.to_string(),
        },
        substatus: Default::default(),
    }
}

pub fn update_current_seq_no(config_seq_no: &Option<String>, exe_path: &Path) -> Result<bool> {
    let mut should_report_status = true;
    match config_seq_no {
        Some(new_seq_no) => {
            logger::write(format!("enable command with new seq no: {new_seq_no}"));
            let current_seq_no_stored_file = exe_path.join(constants::CURRENT_SEQ_NO_FILE);
            match fs::read_to_string(&current_seq_no_stored_file) {
                Ok(seq_no) => {
                    if seq_no != *new_seq_no {
                        logger::write(format!("updating seq no from {} to {}", seq_no, new_seq_no));
                        fs::write(&current_seq_no_stored_file, new_seq_no)?;
                    } else {
                        logger::write("no update on seq no".to_string());
                        should_report_status = false;
                    }
                }
                Err(_e) => {
                    logger::write(format!(
                        "no seq no found, writing seq no {} to file",
                        new_seq_no
                    ));
                    fs::write(&current_seq_no_stored_file, new_seq_no)?;
                }
            }
        }
        None => {
            logger::write_warning("No config seq no found for enable command".to_string());
            return Err(Error::InvalidSettings(
                "No config seq no found for enable command".to_string(),
            ));
        }
    }
    Ok(should_report_status)
}

pub fn get_current_seq_no(exe_path: &Path) -> String {
    let current_seq_no_stored_file = exe_path.join(constants::CURRENT_SEQ_NO_FILE);
    match fs::read_to_string(current_seq_no_stored_file) {
        Ok(seq_no) => {
            logger::write(format!("Current seq no: {}", seq_no));
            seq_no
        }
        Err(e) => {
            logger::write(format!("Error reading current seq no file: {:?}", e));
            "".to_string()
        }
    }
}

pub fn report_status_enable_command(
    status_folder: &Path,
    config_seq_no: &Option<String>,
    status: Option<String>,
) {
    let handler_status = build_status_obj(
        constants::ENABLE_OPERATION,
        &status.unwrap_or_else(|| constants::TRANSITIONING_STATUS.to_string()),
        constants::STATUS_CODE_OK,
        "Enabling the Azure Disk Encryption Extension...",
    );
    report_status(status_folder, config_seq_no, &handler_status);
}

/// Progress sink of a long running encryption. Every report replaces the status file
/// of the current configuration sequence number.
pub trait StatusReporter: Send + Sync {
    fn do_status_report(&self, operation: &str, status: &str, status_code: i32, message: &str);
}

pub struct HandlerStatusReporter {
    status_folder: PathBuf,
    config_seq_no: Option<String>,
}

impl HandlerStatusReporter {
    pub fn new(status_folder: PathBuf, config_seq_no: Option<String>) -> Self {
        HandlerStatusReporter {
            status_folder,
            config_seq_no,
        }
    }
}

impl StatusReporter for HandlerStatusReporter {
    fn do_status_report(&self, operation: &str, status: &str, status_code: i32, message: &str) {
        logger::write(format!(
            "reporting status: operation={operation}, status={status}, code={status_code}, \
             message={message}"
        ));
        let status_obj = build_status_obj(operation, status, status_code, message);
        report_status(&self.status_folder, &self.config_seq_no, &status_obj);
    }
}
