// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! Every external tool the extension drives (`lsblk`, `cryptsetup`, `mount`, `dracut`, ...)
//! goes through a [`CommandExecutor`], so the encryption states can be exercised against
//! scripted outputs.

use crate::error::Error;
use crate::logger;
use crate::result::Result;
pub use vm_encryption_shared::misc_helpers::CommandOutput;
use vm_encryption_shared::misc_helpers;

pub trait CommandExecutor: Send + Sync {
    /// Runs the program and returns its output, whatever its exit code.
    fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Runs the program and fails with [`Error::Command`] on a non-zero exit code.
    fn execute_or_fail(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.execute(program, args)?;
        if !output.is_success() {
            return Err(Error::Command(command_line(program, args), output.message()));
        }
        Ok(output)
    }

    fn execute_in_bash(&self, command: &str) -> Result<CommandOutput> {
        self.execute("/bin/bash", &["-c", command])
    }
}

pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

pub struct ProcessCommandExecutor;

impl CommandExecutor for ProcessCommandExecutor {
    fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        logger::write(format!("executing: {line}"));
        let output = misc_helpers::execute_command(program, args.to_vec(), -1)?;
        if output.is_success() {
            logger::write(format!("'{line}' exit code: 0"));
        } else {
            logger::write_warning(format!("'{line}' {}", output.message()));
        }
        Ok(output)
    }
}
