// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
pub mod command_mock;
pub mod status_mock;
pub mod test_host;

use ctor::{ctor, dtor};
use std::env;
use std::fs;
use std::path::PathBuf;

const TEST_LOG_FILE: &str = "vm_encryption_extension_test.log";

fn get_temp_test_log_dir() -> PathBuf {
    env::temp_dir().join("vm_encryption_extension_test_logs")
}

#[ctor]
fn setup() {
    // every unit test of the crate logs to the same rolling file
    crate::logger::init_logger(&get_temp_test_log_dir(), TEST_LOG_FILE);
}

#[dtor]
fn cleanup() {
    // clean up and ignore the clean up errors
    _ = fs::remove_dir_all(get_temp_test_log_dir());
}
