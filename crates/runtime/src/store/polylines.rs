//! Per-session route geometry side table.
//!
//! Polylines change rarely and are large, so they live outside the event
//! log. The table carries a monotonically increasing version; the worker
//! announces version bumps over the wire and viewers re-fetch the whole
//! table instead of receiving geometry on every update.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;

use serde::{Deserialize, Serialize};
use transitviz_core::{decode, encode};

use super::error::Result;
use super::lock::FileGuard;
use super::log::SessionLog;

const POLYLINES_FILE_NAME: &str = "polylines.json";

/// One leg of a vehicle's route: encoded geometry plus per-segment
/// traversal durations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolylineLeg {
    pub geometry: String,
    pub durations: Vec<f64>,
}

/// Route polylines for every vehicle of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolylineTable {
    /// Bumped on every rewrite; never reset within a session.
    pub version: u64,
    pub vehicles: BTreeMap<String, Vec<PolylineLeg>>,
}

impl SessionLog {
    /// Replace the polylines side table under its file lock.
    pub fn set_polylines(&self, table: &PolylineTable) -> Result<()> {
        let path = self.dir.join(POLYLINES_FILE_NAME);
        let _guard = FileGuard::acquire(&path)?;
        let body = encode(table).map_err(|err| super::error::StoreError::Malformed {
            path: path.clone(),
            source: err,
        })?;
        let mut file = File::create(&path)?;
        writeln!(file, "{body}")?;
        file.flush()?;
        Ok(())
    }

    /// Read the polylines side table; an absent file is an empty table.
    pub fn get_polylines(&self) -> Result<PolylineTable> {
        let path = self.dir.join(POLYLINES_FILE_NAME);
        let _guard = FileGuard::acquire(&path)?;
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PolylineTable::default());
            }
            Err(err) => return Err(err.into()),
        };
        if body.trim().is_empty() {
            return Ok(PolylineTable::default());
        }
        decode(&body).map_err(|err| super::error::StoreError::Malformed { path, source: err })
    }
}
