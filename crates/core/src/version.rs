//! Save-format versioning and load classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the log format produced by this build.
pub const SAVE_VERSION: SaveVersion = SaveVersion { major: 9, minor: 0 };

/// `major.minor` version stamped into every session log header.
///
/// Serialized as a string (`"9.0"`) so readers of a different major fail
/// loudly on parse rather than silently misreading records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SaveVersion {
    pub major: u32,
    pub minor: u32,
}

/// Outcome of comparing a log's version against the store's version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionClass {
    /// Same major, minor not ahead of ours: loadable.
    Current,
    /// Written by a different major version: readable for inspection only.
    Outdated,
    /// Same major but a newer minor than this build knows about.
    Future,
}

impl SaveVersion {
    /// Classify `self` (a header's version) against `current`.
    pub fn classify_against(self, current: SaveVersion) -> VersionClass {
        if self.major != current.major {
            VersionClass::Outdated
        } else if self.minor > current.minor {
            VersionClass::Future
        } else {
            VersionClass::Current
        }
    }

    /// Classify against [`SAVE_VERSION`].
    pub fn classify(self) -> VersionClass {
        self.classify_against(SAVE_VERSION)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid save version `{0}`")]
pub struct ParseVersionError(String);

impl FromStr for SaveVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.split_once('.').ok_or_else(|| ParseVersionError(s.into()))?;
        let major = major.parse().map_err(|_| ParseVersionError(s.into()))?;
        let minor = minor.parse().map_err(|_| ParseVersionError(s.into()))?;
        Ok(Self { major, minor })
    }
}

impl TryFrom<String> for SaveVersion {
    type Error = ParseVersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SaveVersion> for String {
    fn from(version: SaveVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for SaveVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(s: &str) -> SaveVersion {
        s.parse().unwrap()
    }

    #[test]
    fn classification_follows_major_minor_rules() {
        let current = version("9.0");
        assert_eq!(
            version("8.3").classify_against(current),
            VersionClass::Outdated
        );
        assert_eq!(
            version("9.1").classify_against(current),
            VersionClass::Future
        );
        assert_eq!(
            version("9.0").classify_against(current),
            VersionClass::Current
        );
        assert_eq!(
            version("10.0").classify_against(current),
            VersionClass::Outdated
        );
    }

    #[test]
    fn serializes_as_string() {
        assert_eq!(serde_json::to_string(&SAVE_VERSION).unwrap(), "\"9.0\"");
        let parsed: SaveVersion = serde_json::from_str("\"9.1\"").unwrap();
        assert_eq!(parsed, SaveVersion { major: 9, minor: 1 });
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!("9".parse::<SaveVersion>().is_err());
        assert!("nine.zero".parse::<SaveVersion>().is_err());
        assert!(serde_json::from_str::<SaveVersion>("\"9\"").is_err());
    }
}
