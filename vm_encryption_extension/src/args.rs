// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::fmt::{Display, Formatter};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Azure Disk Encryption VM Extension commands
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// install the extension handler
    Install,
    /// enable the extension and launch the encryption daemon
    Enable,
    /// stop the encryption daemon
    Disable,
    /// uninstall the extension handler
    Uninstall,
    /// prepare the handler for an update
    Update,
    /// reset the handler state
    Reset,
    /// run the encryption daemon in the foreground
    Daemon,
}

impl Display for Cli {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Install => write!(f, "install"),
            Command::Enable => write!(f, "enable"),
            Command::Disable => write!(f, "disable"),
            Command::Uninstall => write!(f, "uninstall"),
            Command::Update => write!(f, "update"),
            Command::Reset => write!(f, "reset"),
            Command::Daemon => write!(f, "daemon"),
        }
    }
}
