// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::error::{Error, ParseVersionErrorType};
use crate::result::Result;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub build: Option<u32>,
    pub revision: Option<u32>,
}

impl Version {
    pub fn from_major_minor(major: u32, minor: u32) -> Self {
        Version::from_major_minor_build_revision(major, minor, None, None)
    }

    pub fn from_major_minor_build_revision(
        major: u32,
        minor: u32,
        build: Option<u32>,
        revision: Option<u32>,
    ) -> Self {
        Version {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parses "major.minor[.build[.revision]]".
    /// A bare major such as "8" is accepted as "8.0", some distros report only the major
    /// release. Non-numeric build or revision parts are dropped, "16.04.7-LTS" has no build.
    pub fn from_string(version_string: &str) -> Result<Version> {
        let version_parts = version_string.trim().split('.').collect::<Vec<&str>>();
        if version_parts.is_empty() || version_parts.len() > 4 || version_parts[0].is_empty() {
            return Err(Error::ParseVersion(ParseVersionErrorType::InvalidString));
        }

        let major = version_parts[0].parse::<u32>().map_err(|_| {
            Error::ParseVersion(ParseVersionErrorType::MajorBuild(
                version_string.to_string(),
            ))
        })?;
        if version_parts.len() == 1 {
            return Ok(Version::from_major_minor(major, 0));
        }

        let minor = version_parts[1].parse::<u32>().map_err(|_| {
            Error::ParseVersion(ParseVersionErrorType::MinorBuild(
                version_string.to_string(),
            ))
        })?;

        let build = version_parts.get(2).and_then(|b| b.parse::<u32>().ok());
        let revision = version_parts.get(3).and_then(|r| r.parse::<u32>().ok());

        Ok(Version::from_major_minor_build_revision(
            major, minor, build, revision,
        ))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(b) = self.build {
            write!(f, ".{b}")?;
            if let Some(r) = self.revision {
                write!(f, ".{r}")?;
            }
        }
        Ok(())
    }
}
