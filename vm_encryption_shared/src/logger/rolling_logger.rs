// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::logger::{self, LoggerLevel};
use crate::misc_helpers;
use crate::result::Result;
use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::PathBuf;

const LOG_FILE_EXTENSION: &str = "log";

/// Appends lines to `<dir>/<file_name>.log` and archives the file once it grows past
/// `max_file_size` bytes, keeping at most `max_file_count` files in the folder.
#[derive(Debug)]
pub struct RollingLogger {
    log_dir: PathBuf,
    log_file_name: String,
    max_file_size: u64,
    max_file_count: u16,
}

impl RollingLogger {
    pub fn create_new(
        dir: PathBuf,
        file_name: String,
        max_file_size: u64,
        max_file_count: u16,
    ) -> RollingLogger {
        // the extension is appended when the file path is built
        let file_name = file_name
            .strip_suffix(".log")
            .map(|s| s.to_string())
            .unwrap_or(file_name);
        RollingLogger {
            log_dir: dir,
            log_file_name: file_name,
            max_file_size,
            max_file_count,
        }
    }

    pub fn write(&self, level: LoggerLevel, message: String) -> Result<()> {
        let line = format!("{}{}", logger::get_log_header(level), message);
        self.write_line(line)
    }

    fn open_file(&self) -> Result<LineWriter<File>> {
        misc_helpers::try_create_folder(&self.log_dir)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_file_path())?;
        Ok(LineWriter::new(file))
    }

    fn write_line(&self, message: String) -> Result<()> {
        self.roll_if_needed()?;

        let mut writer = self.open_file()?;
        writer.write_all(message.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn roll_if_needed(&self) -> Result<()> {
        // make sure the current file exists before checking its size
        self.open_file()?;

        let file_length = self.current_file_path().metadata()?.len();
        if file_length >= self.max_file_size {
            self.archive_file()?;
        }
        Ok(())
    }

    fn archive_file(&self) -> Result<()> {
        let archived = self.archived_file_path(&format!(
            "{}-{}",
            misc_helpers::get_date_time_string_with_milliseconds(),
            misc_helpers::get_date_time_unix_nano()
        ));
        fs::rename(self.current_file_path(), archived)?;

        // delete the oldest files, the new current file is created right after
        let log_files = self.get_log_files()?;
        let max_count: usize = self.max_file_count.into();
        if log_files.len() >= max_count {
            let remove_count = log_files.len() + 1 - max_count;
            for file in log_files.iter().take(remove_count) {
                fs::remove_file(file)?;
            }
        }
        Ok(())
    }

    pub fn get_log_files(&self) -> Result<Vec<PathBuf>> {
        let mut log_files: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&self.log_dir)? {
            let entry = entry?;
            let file_full_path = entry.path();
            if !file_full_path.is_file() {
                continue;
            }

            // ignore any file name which cannot convert to string safely
            match entry.file_name().into_string() {
                Ok(file_name) if file_name.starts_with(&self.log_file_name) => {
                    log_files.push(file_full_path)
                }
                _ => continue,
            }
        }

        log_files.sort();
        Ok(log_files)
    }

    fn current_file_path(&self) -> PathBuf {
        self.log_dir
            .join(format!("{}.{}", self.log_file_name, LOG_FILE_EXTENSION))
    }

    fn archived_file_path(&self, timestamp: &str) -> PathBuf {
        self.log_dir.join(format!(
            "{}.{}.{}",
            self.log_file_name,
            timestamp.replace(':', "."),
            LOG_FILE_EXTENSION
        ))
    }
}
