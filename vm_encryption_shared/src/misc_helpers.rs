// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::error::{CommandErrorType, Error};
use crate::linux;
use crate::result::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use time::{format_description, OffsetDateTime};

/// Exit code, stdout and stderr of one finished external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: String, stderr: String) -> Self {
        CommandOutput {
            exit_code,
            stdout,
            stderr,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn stdout(&self) -> String {
        self.stdout.clone()
    }

    pub fn stderr(&self) -> String {
        self.stderr.clone()
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn message(&self) -> String {
        format!(
            "exit code: '{}', stdout: '{}', stderr: '{}'",
            self.exit_code,
            self.stdout.trim(),
            self.stderr.trim()
        )
    }
}

pub fn get_thread_identity() -> String {
    format!("{:0>8}", thread_id::get())
}

fn format_now(description: &str) -> String {
    match format_description::parse(description) {
        Ok(format) => OffsetDateTime::now_utc()
            .format(&format)
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

pub fn get_date_time_string_with_milliseconds() -> String {
    format_now("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]")
}

pub fn get_date_time_string() -> String {
    format_now("[year]-[month]-[day]T[hour]:[minute]:[second]Z")
}

pub fn get_date_time_unix_nano() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos()
}

pub fn try_create_folder(dir: &Path) -> Result<()> {
    if !dir.try_exists()? {
        // Recursively create a directory and all of its parent components if they are missing
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

pub fn json_write_to_file<T>(obj: &T, file_path: &Path) -> Result<()>
where
    T: ?Sized + Serialize,
{
    let file = File::create(file_path)?;
    serde_json::to_writer_pretty(file, obj)?;

    Ok(())
}

pub fn json_read_from_file<T>(file_path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let file = File::open(file_path)?;
    let obj: T = serde_json::from_reader(file)?;

    Ok(obj)
}

/// Writes the content to a sibling temp file, syncs it and renames it over `file_path`,
/// so a reader never observes a partially written file.
pub fn write_file_atomically(file_path: &Path, content: &[u8]) -> Result<()> {
    let file_name = get_file_name(file_path);
    let temp_path = file_path.with_file_name(format!(".{file_name}.tmp"));
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, file_path)?;
    Ok(())
}

pub fn get_current_exe_dir() -> PathBuf {
    match std::env::current_exe() {
        Ok(mut path) => {
            path.pop();
            path
        }
        Err(_) => PathBuf::from("."),
    }
}

pub fn get_long_os_version() -> String {
    linux::get_long_os_version()
}

pub fn get_processor_arch() -> String {
    linux::get_processor_arch()
}

pub fn path_to_string(path: &Path) -> String {
    path.display().to_string()
}

pub fn get_file_name(path: &Path) -> String {
    match path.file_name() {
        Some(s) => s.to_str().unwrap_or("InvalidPath").to_string(),
        None => "InvalidPath".to_string(),
    }
}

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn get_current_version() -> String {
    VERSION.to_string()
}

pub fn get_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_full_path = entry.path();
        if !fs::metadata(&file_full_path)?.is_file() {
            continue;
        }
        files.push(file_full_path);
    }
    files.sort();
    Ok(files)
}

/// Runs the program to completion and captures its exit code, stdout and stderr.
/// A non-zero exit code is not an error here; an Error is returned only when the
/// program cannot be launched at all.
pub fn execute_command(
    program: &str,
    args: Vec<&str>,
    default_error_code: i32,
) -> Result<CommandOutput> {
    execute_command_with_input(program, args, None, default_error_code)
}

pub fn execute_command_with_input(
    program: &str,
    args: Vec<&str>,
    input: Option<&[u8]>,
    default_error_code: i32,
) -> Result<CommandOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = command.spawn().map_err(|e| {
        Error::Command(
            CommandErrorType::Launch(program.to_string()),
            format!("error: {e}"),
        )
    })?;
    if let Some(input) = input {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input)?;
        }
    }
    let output = child.wait_with_output()?;

    Ok(CommandOutput::new(
        output.status.code().unwrap_or(default_error_code),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    ))
}
