//! Build identity of a deployable artifact.
//!
//! A build version is the `year.month.day.build` quadruple that orders
//! candidates inside one major version. Ordering is lexicographic over the
//! four fields, which `derive(Ord)` gives us from the field order.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Fine-grained identity of a build inside a major version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BuildVersion {
    pub year: u32,
    pub month: u32,
    pub day: u32,
    pub build: u32,
}

/// Error returned when a build string is not four dot-separated integers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid build version '{0}': expected year.month.day.build")]
pub struct ParseBuildVersionError(pub String);

impl BuildVersion {
    pub fn new(year: u32, month: u32, day: u32, build: u32) -> Self {
        Self { year, month, day, build }
    }

    /// Name used for hosting directories and instance labels,
    /// e.g. `2_2024_03_07_12` for major 2.
    pub fn host_name(&self, major: u32) -> String {
        format!(
            "{}_{}_{:02}_{:02}_{}",
            major, self.year, self.month, self.day, self.build
        )
    }
}

impl FromStr for BuildVersion {
    type Err = ParseBuildVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 4 {
            return Err(ParseBuildVersionError(s.to_string()));
        }

        let mut fields = [0u32; 4];
        for (slot, part) in fields.iter_mut().zip(parts) {
            *slot = part
                .parse()
                .map_err(|_| ParseBuildVersionError(s.to_string()))?;
        }

        Ok(Self::new(fields[0], fields[1], fields[2], fields[3]))
    }
}

impl fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}.{:02}.{}",
            self.year, self.month, self.day, self.build
        )
    }
}

/// Display and exact-match name of a live version: `{major}-{yyyy}.{MM}.{dd}.{build}`.
pub fn version_name(major: u32, minor: &BuildVersion) -> String {
    format!("{}-{}", major, minor)
}
