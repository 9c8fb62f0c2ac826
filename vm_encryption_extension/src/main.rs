// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
#![allow(non_snake_case)]

pub mod args;
pub mod bek_util;
pub mod command_executor;
pub mod common;
pub mod constants;
pub mod crypt_mount_config;
pub mod daemon;
pub mod disk_util;
pub mod error;
pub mod handler_main;
pub mod logger;
pub mod online_encryption;
pub mod oscrypto;
pub mod result;
pub mod settings;
pub mod structs;

#[cfg(test)]
pub mod test_mock;

use args::{Cli, Command};
use clap::Parser;
use std::env;
use std::process;

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Daemon => process::exit(daemon::start_daemon()),
        command => {
            // the guest agent names the settings file of this request
            let config_seq_no = env::var("ConfigSequenceNumber").ok();
            handler_main::program_start(command, config_seq_no);
        }
    }
}
