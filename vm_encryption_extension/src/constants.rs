// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
pub const PLUGIN_NAME: &str = "AzureDiskEncryptionForLinux";
pub const HANDLER_ENVIRONMENT_FILE: &str = "HandlerEnvironment.json";
pub const HANDLER_LOG_FILE: &str = "VMEncryptionExtension.log";
pub const DAEMON_LOG_FILE: &str = "VMEncryptionDaemon.log";
pub const EXTENSION_PROCESS_NAME: &str = "VMEncryptionExt";
pub const DAEMON_ARG: &str = "daemon";
pub const DAEMON_UNIT_NAME: &str = "azure-disk-encryption-daemon";
pub const UPDATE_TAG_FILE: &str = "update.tag";
pub const ENABLE_OPERATION: &str = "Enable";
pub const ENCRYPTION_OPERATION: &str = "EnableEncryption";
pub const DISABLE_ENCRYPTION_OPERATION: &str = "DisableEncryption";
pub const LANG_EN_US: &str = "en-US";
pub const STATUS_FILE_SUFFIX: &str = "status";
pub const CONFIG_FILE_SUFFIX: &str = "settings";
pub const TRANSITIONING_STATUS: &str = "transitioning";
pub const ERROR_STATUS: &str = "error";
pub const SUCCESS_STATUS: &str = "success";
pub const HEARTBEAT_READY_STATUS: &str = "ready";

pub const CURRENT_SEQ_NO_FILE: &str = "current_seq_no.txt";
pub const VERSION: &str = "1.0";
pub const DAEMON_START_RETRY_COUNT: u32 = 5;

// exit codes of the handler and daemon processes
pub const EXIT_CODE_HANDLERENV_ERR: i32 = 2;
pub const EXIT_CODE_NO_CONFIG_SEQ_NO: i32 = 10;
pub const EXIT_CODE_DAEMON_START_ERR: i32 = 11;
pub const EXIT_CODE_UPDATE_TO_VERSION_ENV_VAR_NOTFOUND: i32 = 15;
pub const EXIT_CODE_NOT_SUPPORTED_OS_VERSION: i32 = 16;
pub const EXIT_CODE_ENCRYPTION_FAILED: i32 = 17;
/// The daemon exits with this code to be relaunched by its supervisor.
pub const EXIT_CODE_RESTART_REQUESTED: i32 = 18;
pub const EXIT_CODE_HOST_LOCKED: i32 = 19;
pub const EXIT_CODE_INVALID_SETTINGS: i32 = 20;

// status codes reported in the status file
pub const STATUS_CODE_OK: i32 = 0;
pub const UNKNOWN_ERROR: i32 = 1;
pub const STATUS_CODE_NOT_OK: i32 = 6;
pub const NOT_SUPPORTED_OS_VERSION: i32 = 12;
pub const UNMOUNT_OLDROOT_ERROR: i32 = 16;
pub const ENCRYPTION_FAILED_ERROR: i32 = 20;
pub const PASSPHRASE_FILE_NOT_FOUND_ERROR: i32 = 21;
pub const INVALID_SETTINGS_ERROR: i32 = 22;
pub const ROOT_DEVICE_UNRESOLVED_ERROR: i32 = 23;
pub const HOST_LOCKED_ERROR: i32 = 24;
pub const PATCH_ARTIFACT_MISSING_ERROR: i32 = 25;

pub const ENCRYPTION_CONFIG_FILE: &str = "AzureDiskEncryption.json";
pub const ENCRYPTION_CONFIG_ENV_VAR: &str = "AZURE_DISK_ENCRYPTION_CONFIG_FULL_PATH";

// OS volume layout
pub const OS_MAPPER_NAME: &str = "osencrypt";
pub const OS_MAPPER_PATH: &str = "/dev/mapper/osencrypt";
pub const BEK_VOLUME_LABEL: &str = "BEK VOLUME";
pub const DEFAULT_PASSPHRASE_FILE_NAME: &str = "LinuxPassPhraseFileName";
pub const ROOT_VG_NAME: &str = "rootvg";
