// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! Durable record of the migration progress: one marker file per exited state.
//! A marker is written to a temp file, synced and renamed into place, so a power loss
//! leaves either no marker or a complete one.

use super::encryption_state::EncryptionState;
use crate::error::Error;
use crate::logger;
use crate::result::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use vm_encryption_shared::misc_helpers;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StateMarker {
    pub state: EncryptionState,
    pub sequence: u64,
    pub created_time: String,
}

#[derive(Debug, Clone)]
pub struct MarkerStore {
    markers_dir: PathBuf,
}

impl MarkerStore {
    pub fn new(markers_dir: &Path) -> Self {
        MarkerStore {
            markers_dir: markers_dir.to_path_buf(),
        }
    }

    pub fn markers_dir(&self) -> &Path {
        &self.markers_dir
    }

    fn marker_path(&self, state: EncryptionState) -> Result<PathBuf> {
        match state.marker_name() {
            Some(name) => Ok(self.markers_dir.join(name)),
            None => Err(Error::Marker(format!("state {state} has no marker"))),
        }
    }

    pub fn exists(&self, state: EncryptionState) -> Result<bool> {
        Ok(self.marker_path(state)?.try_exists()?)
    }

    /// Creates the marker of `state` unless it already exists, and returns it.
    pub fn record(&self, state: EncryptionState) -> Result<StateMarker> {
        if let Some(marker) = self.read(state)? {
            return Ok(marker);
        }

        let sequence = match self.latest()? {
            Some(latest) => latest.sequence + 1,
            None => 1,
        };
        let marker = StateMarker {
            state,
            sequence,
            created_time: misc_helpers::get_date_time_string(),
        };
        misc_helpers::try_create_folder(&self.markers_dir)?;
        let content = serde_json::to_vec(&marker)?;
        misc_helpers::write_file_atomically(&self.marker_path(state)?, &content)?;
        logger::write(format!(
            "created marker for state {} with sequence {}",
            state, sequence
        ));
        Ok(marker)
    }

    pub fn read(&self, state: EncryptionState) -> Result<Option<StateMarker>> {
        let path = self.marker_path(state)?;
        if !path.try_exists()? {
            return Ok(None);
        }
        let content = fs::read(&path)?;
        if content.is_empty() {
            // zero-byte markers of earlier extension versions carry no sequence
            return Ok(Some(StateMarker {
                state,
                sequence: 0,
                created_time: String::new(),
            }));
        }
        match serde_json::from_slice::<StateMarker>(&content) {
            Ok(marker) if marker.state == state => Ok(Some(marker)),
            Ok(marker) => Err(Error::Marker(format!(
                "marker '{}' records state {}",
                misc_helpers::path_to_string(&path),
                marker.state
            ))),
            Err(e) => Err(Error::Marker(format!(
                "marker '{}' is corrupted: {e}",
                misc_helpers::path_to_string(&path)
            ))),
        }
    }

    pub fn list(&self) -> Result<Vec<StateMarker>> {
        let mut markers = Vec::new();
        for state in EncryptionState::MARKED {
            if let Some(marker) = self.read(state)? {
                markers.push(marker);
            }
        }
        markers.sort_by_key(|m| (m.sequence, m.state));
        Ok(markers)
    }

    /// The most recently exited state. Legacy markers all carry sequence 0 and are
    /// ordered by their position in the pipeline.
    pub fn latest(&self) -> Result<Option<StateMarker>> {
        Ok(self.list()?.pop())
    }

    fn step_path(&self, state: EncryptionState, step: &str) -> Result<PathBuf> {
        let marker = self.marker_path(state)?;
        Ok(marker.with_file_name(format!("{}.{step}", misc_helpers::get_file_name(&marker))))
    }

    /// Records progress inside `state` that must not be repeated if the state is entered again.
    pub fn record_step(&self, state: EncryptionState, step: &str) -> Result<()> {
        let path = self.step_path(state, step)?;
        if path.try_exists()? {
            return Ok(());
        }
        misc_helpers::try_create_folder(&self.markers_dir)?;
        misc_helpers::write_file_atomically(
            &path,
            misc_helpers::get_date_time_string().as_bytes(),
        )?;
        logger::write(format!("recorded step {step} of state {state}"));
        Ok(())
    }

    pub fn step_exists(&self, state: EncryptionState, step: &str) -> Result<bool> {
        Ok(self.step_path(state, step)?.try_exists()?)
    }

    /// Removes the marker of `state` together with its step markers.
    pub fn clear(&self, state: EncryptionState) -> Result<()> {
        let path = self.marker_path(state)?;
        if path.try_exists()? {
            fs::remove_file(&path)?;
            logger::write(format!("removed marker for state {state}"));
        }
        if !self.markers_dir.try_exists()? {
            return Ok(());
        }
        let step_prefix = format!("{}.", misc_helpers::get_file_name(&path));
        for entry in fs::read_dir(&self.markers_dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&step_prefix) {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    pub fn clear_all(&self) -> Result<()> {
        for state in EncryptionState::MARKED {
            self.clear(state)?;
        }
        Ok(())
    }

    /// Clears every marker once the migration has finished patching the boot system.
    /// A partially migrated disk keeps its markers. Returns whether the markers were cleared.
    pub fn reset_if_finished(&self) -> Result<bool> {
        match self.latest()? {
            Some(marker)
                if marker.state == EncryptionState::PatchBootSystem
                    || marker.state == EncryptionState::ResumeEncryption =>
            {
                self.clear_all()?;
                Ok(true)
            }
            Some(marker) => {
                logger::write_warning(format!(
                    "OS encryption stopped after state {}, markers are kept",
                    marker.state
                ));
                Ok(false)
            }
            None => Ok(false),
        }
    }
}
