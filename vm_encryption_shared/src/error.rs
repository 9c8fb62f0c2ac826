// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Failed to create regex with error: {0}")]
    Regex(#[from] regex::Error),

    #[error("{0}")]
    ParseVersion(ParseVersionErrorType),

    #[error("{0} command failed: {1}")]
    Command(CommandErrorType, String),
}

#[derive(Debug, thiserror::Error)]
pub enum ParseVersionErrorType {
    #[error("Invalid version string")]
    InvalidString,

    #[error("Cannot read Major build from {0}")]
    MajorBuild(String),

    #[error("Cannot read Minor build from {0}")]
    MinorBuild(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandErrorType {
    #[error("{0}")]
    CommandName(String),

    #[error("'{0}' could not be launched")]
    Launch(String),
}

#[cfg(test)]
mod test {
    use super::{CommandErrorType, Error, ParseVersionErrorType};
    use std::fs;

    #[test]
    fn error_formatting_test() {
        let mut error: Error = fs::metadata("file_does_not_exist.txt")
            .map_err(Into::into)
            .unwrap_err();
        assert_eq!(error.to_string(), "No such file or directory (os error 2)");

        error = regex::Regex::new(r"abc(").map_err(Into::into).unwrap_err();
        assert!(error
            .to_string()
            .contains("Failed to create regex with error: regex parse error:"));

        error = Error::ParseVersion(ParseVersionErrorType::MajorBuild("x.5.0".to_string()));
        assert_eq!(error.to_string(), "Cannot read Major build from x.5.0");

        error = Error::Command(
            CommandErrorType::CommandName("cryptsetup luksOpen".to_string()),
            "exit code: 2".to_string(),
        );
        assert_eq!(
            error.to_string(),
            "cryptsetup luksOpen command failed: exit code: 2"
        );
    }
}
