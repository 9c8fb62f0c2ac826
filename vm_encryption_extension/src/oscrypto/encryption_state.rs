// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Position of the OS disk migration. The current position is never stored as such;
/// it is re-derived from the state markers on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EncryptionState {
    Uninitialized,
    Prereq,
    Selinux,
    Stripdown,
    UnmountOldroot,
    EncryptBlockDevice,
    PatchBootSystem,
    ResumeEncryption,
    Completed,
}

impl EncryptionState {
    /// States that persist a marker once they have exited.
    pub const MARKED: [EncryptionState; 7] = [
        EncryptionState::Prereq,
        EncryptionState::Selinux,
        EncryptionState::Stripdown,
        EncryptionState::UnmountOldroot,
        EncryptionState::EncryptBlockDevice,
        EncryptionState::PatchBootSystem,
        EncryptionState::ResumeEncryption,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EncryptionState::Uninitialized => "Uninitialized",
            EncryptionState::Prereq => "Prereq",
            EncryptionState::Selinux => "Selinux",
            EncryptionState::Stripdown => "Stripdown",
            EncryptionState::UnmountOldroot => "UnmountOldroot",
            EncryptionState::EncryptBlockDevice => "EncryptBlockDevice",
            EncryptionState::PatchBootSystem => "PatchBootSystem",
            EncryptionState::ResumeEncryption => "ResumeEncryption",
            EncryptionState::Completed => "Completed",
        }
    }

    /// File name of the marker, `None` for the two terminal positions.
    pub fn marker_name(&self) -> Option<String> {
        match self {
            EncryptionState::Uninitialized | EncryptionState::Completed => None,
            _ => Some(format!("{}State", self.name())),
        }
    }
}

impl Display for EncryptionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
