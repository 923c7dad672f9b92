//! Line-oriented JSON codec for log records.
//!
//! Encoding is idempotent (`decode(encode(x)) == x` for every valid record)
//! and a structurally invalid line fails with [`MalformedRecord`]. Callers
//! map that to corruption handling; it must never escape as a crash.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Decode (or encode) failure for one log line.
#[derive(Debug, Error)]
#[error("malformed record: {0}")]
pub struct MalformedRecord(#[from] serde_json::Error);

/// Encode one record as a single log line, without the trailing newline.
pub fn encode<T: Serialize>(record: &T) -> Result<String, MalformedRecord> {
    Ok(serde_json::to_string(record)?)
}

/// Decode one log line into a record type.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, MalformedRecord> {
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Environment, Record};

    #[test]
    fn rejects_structurally_invalid_lines() {
        assert!(decode::<Record>("not json").is_err());
        assert!(decode::<Record>("{\"unrelated\":true}").is_err());
        assert!(decode::<Environment>("{\"passengers\":{}}").is_err());
    }

    #[test]
    fn tolerates_trailing_newline() {
        let line = encode(&Environment::empty_base()).unwrap();
        let decoded: Environment = decode(&format!("{line}\n")).unwrap();
        assert_eq!(decoded, Environment::empty_base());
    }
}
