//! Replay/resync engine.
//!
//! Given a viewer's visualization time and the record orders it already
//! holds, computes the minimal set of checkpoints and updates that brings
//! it up to date around that time: O(log N) search over an in-memory index
//! plus O(window) full decodes, independent of total session length.
//!
//! The index of `(offset, order, timestamp, kind)` tuples is rebuilt from
//! one offset scan per call; checkpoint positions are taken from the index,
//! never re-derived from the checkpoint cadence, so an adaptive cadence
//! would only ever change the writer.

use std::collections::BTreeSet;

use serde::Deserialize;
use transitviz_core::{
    BASE_ORDER, Environment, Order, Timestamp, Update, decode,
};

use crate::store::{SessionLog, StoreError};

/// Missing records for one resync request.
///
/// `checkpoints` are bases to load, `updates` the deltas to replay on top;
/// both are ordered by `order` and already filtered against what the viewer
/// reported as loaded.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResyncPayload {
    pub checkpoints: Vec<Environment>,
    pub updates: Vec<Update>,
}

impl ResyncPayload {
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty() && self.updates.is_empty()
    }
}

/// Minimal per-line decode for index building.
///
/// Checkpoints are recognized by their `passengers` field; the header line
/// is excluded before probing, so anything else that fails this decode is a
/// malformed record.
#[derive(Deserialize)]
struct IndexProbe {
    order: Order,
    timestamp: Timestamp,
    #[serde(default)]
    passengers: Option<serde::de::IgnoredAny>,
}

struct IndexEntry {
    order: Order,
    timestamp: Timestamp,
    is_checkpoint: bool,
}

/// Computes minimal catch-up payloads from a session log.
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    /// Checkpoints kept on each side of the bracketing checkpoint, so the
    /// viewer can scrub nearby without a fresh request per seek.
    radius: usize,
}

impl ReplayEngine {
    pub fn new(radius: usize) -> Self {
        Self { radius }
    }

    /// Compute the records missing from a viewer at `visualization_time`.
    ///
    /// Any failure (malformed line, I/O error) marks the session corrupted
    /// (sticky) and surfaces as [`StoreError::Corrupted`] rather than
    /// returning partial data.
    pub fn resync(
        &self,
        log: &SessionLog,
        visualization_time: Timestamp,
        loaded_orders: &BTreeSet<Order>,
    ) -> Result<ResyncPayload, StoreError> {
        if log.is_corrupted() {
            return Err(StoreError::Corrupted(log.id().clone()));
        }

        match self.compute(log, visualization_time, loaded_orders) {
            Ok(payload) => Ok(payload),
            Err(err) => {
                tracing::error!(
                    "resync failed for session {}: {err}; marking corrupted",
                    log.id()
                );
                if let Err(mark_err) = log.mark_corrupted() {
                    tracing::error!(
                        "failed to persist corruption marker for {}: {mark_err}",
                        log.id()
                    );
                }
                Err(StoreError::Corrupted(log.id().clone()))
            }
        }
    }

    fn compute(
        &self,
        log: &SessionLog,
        visualization_time: Timestamp,
        loaded_orders: &BTreeSet<Order>,
    ) -> Result<ResyncPayload, StoreError> {
        let offsets = log.extract_offsets()?;

        let mut payload = ResyncPayload::default();

        // Nothing but the header yet: hand back the deterministic base so
        // the viewer can render an empty world and apply live deltas.
        if offsets.len() <= 1 {
            if !loaded_orders.contains(&BASE_ORDER) {
                payload.checkpoints.push(Environment::empty_base());
            }
            return Ok(payload);
        }

        let lines = log.read_lines_from(offsets[1], usize::MAX)?;
        let mut entries = Vec::with_capacity(lines.len());
        let mut checkpoint_positions = Vec::new();
        for line in &lines {
            let probe: IndexProbe = decode(line).map_err(|source| StoreError::Malformed {
                path: log.log_path().to_path_buf(),
                source,
            })?;
            if probe.passengers.is_some() {
                checkpoint_positions.push(entries.len());
            }
            entries.push(IndexEntry {
                order: probe.order,
                timestamp: probe.timestamp,
                is_checkpoint: probe.passengers.is_some(),
            });
        }

        // First record strictly after the requested time; timestamps are
        // monotonic non-decreasing within a session.
        let first_after = entries.partition_point(|e| e.timestamp <= visualization_time);
        // Checkpoints strictly before that position.
        let preceding = checkpoint_positions.partition_point(|&p| p < first_after);

        let (window_start, window_end) = if preceding == 0 {
            // The window starts before the first checkpoint: synthesize the
            // empty base and cover the first `radius + 1` checkpoints.
            if !loaded_orders.contains(&BASE_ORDER) {
                payload.checkpoints.push(Environment::empty_base());
            }
            if checkpoint_positions.is_empty() {
                (0, entries.len())
            } else {
                let hi = self.radius.min(checkpoint_positions.len() - 1);
                (0, segment_end(&checkpoint_positions, hi, entries.len()))
            }
        } else {
            let center = preceding - 1;
            let lo = center.saturating_sub(self.radius);
            let hi = (center + self.radius).min(checkpoint_positions.len() - 1);
            (
                checkpoint_positions[lo],
                segment_end(&checkpoint_positions, hi, entries.len()),
            )
        };

        for (position, entry) in entries
            .iter()
            .enumerate()
            .take(window_end)
            .skip(window_start)
        {
            if loaded_orders.contains(&entry.order) {
                continue;
            }
            let line = &lines[position];
            if entry.is_checkpoint {
                let environment =
                    decode(line).map_err(|source| StoreError::Malformed {
                        path: log.log_path().to_path_buf(),
                        source,
                    })?;
                payload.checkpoints.push(environment);
            } else {
                let update = decode(line).map_err(|source| StoreError::Malformed {
                    path: log.log_path().to_path_buf(),
                    source,
                })?;
                payload.updates.push(update);
            }
        }

        Ok(payload)
    }
}

/// Exclusive end of the records covered by the window whose last checkpoint
/// index is `hi`: everything up to the next checkpoint, or the end of log.
fn segment_end(checkpoint_positions: &[usize], hi: usize, entry_count: usize) -> usize {
    checkpoint_positions
        .get(hi + 1)
        .copied()
        .unwrap_or(entry_count)
}
