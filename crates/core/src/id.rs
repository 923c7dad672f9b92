//! Sortable simulation identifiers and name validation.

use std::fmt;

use chrono::Local;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the timestamp and name parts of a simulation id.
///
/// The id doubles as the on-disk directory name, so this sequence is also
/// forbidden inside user-supplied names.
pub const SAVE_FILE_SEPARATOR: &str = "---";

const NAME_MIN_LENGTH: usize = 3;
const NAME_MAX_LENGTH: usize = 50;

/// Characters that would break directory names on at least one platform.
const FILESYSTEM_UNSAFE: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Rejection reasons for a user-supplied simulation name.
///
/// Validation runs before any resource is allocated for the session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name must be at least {NAME_MIN_LENGTH} characters")]
    TooShort,

    #[error("name must be at most {NAME_MAX_LENGTH} characters")]
    TooLong,

    #[error("name must not contain `{SAVE_FILE_SEPARATOR}`")]
    ContainsSeparator,

    #[error("name must not contain filesystem-unsafe characters (/ \\ : * ? \" < > |)")]
    UnsafeCharacter,
}

/// Validate a simulation name against the id and filesystem constraints.
pub fn validate_name(name: &str) -> Result<(), NameError> {
    if name.chars().count() < NAME_MIN_LENGTH {
        return Err(NameError::TooShort);
    }
    if name.chars().count() > NAME_MAX_LENGTH {
        return Err(NameError::TooLong);
    }
    if name.contains(SAVE_FILE_SEPARATOR) {
        return Err(NameError::ContainsSeparator);
    }
    if name.chars().any(|c| FILESYSTEM_UNSAFE.contains(&c)) {
        return Err(NameError::UnsafeCharacter);
    }
    Ok(())
}

/// Unique, chronologically sortable simulation identifier.
///
/// Format: `{YYYYMMDD-HHMMSSmmm}---{name}`. The wall-clock stamp comes
/// first so lexicographic order is creation order, which keeps directory
/// listings and session lists sorted for free.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationId(String);

impl SimulationId {
    /// Allocate a fresh id for a validated name using the current wall clock.
    pub fn generate(name: &str) -> Result<Self, NameError> {
        validate_name(name)?;
        let stamp = Local::now().format("%Y%m%d-%H%M%S%3f");
        Ok(Self(format!("{stamp}{SAVE_FILE_SEPARATOR}{name}")))
    }

    /// Rebuild an id from a persisted directory name, without validation.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name part of the id, if the id is well-formed.
    pub fn name(&self) -> Option<&str> {
        self.0.split_once(SAVE_FILE_SEPARATOR).map(|(_, name)| name)
    }

    /// The wall-clock stamp part of the id.
    pub fn start_time(&self) -> Option<&str> {
        self.0.split_once(SAVE_FILE_SEPARATOR).map(|(stamp, _)| stamp)
    }
}

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SimulationId> for String {
    fn from(id: SimulationId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        assert_eq!(validate_name("rush-hour"), Ok(()));
        assert_eq!(validate_name("abc"), Ok(()));
        assert_eq!(validate_name(&"x".repeat(50)), Ok(()));
    }

    #[test]
    fn rejects_length_bounds() {
        assert_eq!(validate_name("ab"), Err(NameError::TooShort));
        assert_eq!(validate_name(&"x".repeat(51)), Err(NameError::TooLong));
    }

    #[test]
    fn rejects_separator_and_unsafe_characters() {
        assert_eq!(validate_name("a---b"), Err(NameError::ContainsSeparator));
        assert_eq!(validate_name("a/b"), Err(NameError::UnsafeCharacter));
        assert_eq!(validate_name("a:b"), Err(NameError::UnsafeCharacter));
        assert_eq!(validate_name("a?b"), Err(NameError::UnsafeCharacter));
    }

    #[test]
    fn generated_ids_expose_their_parts() {
        let id = SimulationId::generate("morning-peak").unwrap();
        assert_eq!(id.name(), Some("morning-peak"));
        let stamp = id.start_time().unwrap();
        // YYYYMMDD-HHMMSSmmm
        assert_eq!(stamp.len(), 18);
        assert!(id.as_str().ends_with("---morning-peak"));
    }

    #[test]
    fn ids_sort_chronologically() {
        let earlier = SimulationId::from_raw("20250101-120000000---zzz");
        let later = SimulationId::from_raw("20250102-080000000---aaa");
        assert!(earlier < later);
    }
}
