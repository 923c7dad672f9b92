//! End-to-end resync over a large synthetic session log.
//!
//! Builds a 10,000-event log through the worker-side collector (checkpoint
//! step 1000), then exercises the replay engine the way a scrubbing viewer
//! would.

use std::collections::BTreeSet;

use tempfile::TempDir;
use transitviz_core::{Environment, Header, Order, SimulationId, Timestamp, Update};
use transitviz_runtime::replay::ReplayEngine;
use transitviz_runtime::store::LogStore;
use transitviz_runtime::worker::{Collector, DomainEvent, LiveSink};

const STEP: i64 = 1000;
const EVENTS: i64 = 10_000;
const RADIUS: usize = 5;

struct NullSink;

impl LiveSink for NullSink {
    fn started(&mut self, _simulation_start_time: Timestamp) {}
    fn update(&mut self, _update: &Update) {}
    fn time_changed(&mut self, _timestamp: Timestamp) {}
    fn estimated_end_time_changed(&mut self, _estimated_end_time: Timestamp) {}
    fn polylines_version_changed(&mut self, _version: u64) {}
}

fn released(i: i64) -> DomainEvent {
    DomainEvent::PassengerReleased {
        // One simulated second per ten events.
        time: i as f64 / 10.0,
        id: format!("p-{i}"),
        name: None,
    }
}

fn build_session(dir: &TempDir) -> (LogStore, SimulationId) {
    let store = LogStore::new(dir.path());
    let id = SimulationId::from_raw("20250101-080000000---large");
    let log = store.open(&id).unwrap();
    let header = Header::new(&id, "dataset");
    let mut collector = Collector::new(log, header, NullSink, STEP).unwrap();
    for i in 0..EVENTS {
        collector.process_event(released(i), 1_000.0).unwrap();
    }
    collector.finish().unwrap();
    (store, id)
}

/// Independently computed ground truth at `time`: every passenger released
/// at or before it.
fn reference_passenger_count(time: f64) -> usize {
    (0..EVENTS).filter(|i| *i as f64 / 10.0 <= time).count()
}

#[test]
fn resync_is_minimal_and_correct() {
    let dir = TempDir::new().unwrap();
    let (store, id) = build_session(&dir);
    let log = store.open(&id).unwrap();
    let engine = ReplayEngine::new(RADIUS);

    let time = 512.3;
    let payload = engine.resync(&log, time, &BTreeSet::new()).unwrap();

    // The checkpoint window brackets the requested timestamp.
    let first = payload.checkpoints.first().unwrap();
    let last = payload.checkpoints.last().unwrap();
    assert!(first.timestamp <= time);
    assert!(last.timestamp > time);

    // Window-sized, not log-sized.
    assert!(payload.checkpoints.len() <= 2 * RADIUS + 1);
    assert!(payload.updates.len() <= (2 * RADIUS + 1) * (STEP as usize));

    // Replaying the earliest checkpoint plus the returned updates up to the
    // requested time reproduces the state at that time.
    let mut replayed: Environment = first.clone();
    for update in payload.updates.iter().filter(|u| u.timestamp <= time) {
        assert!(update.order > first.order);
        replayed.apply(update).unwrap();
    }
    assert_eq!(replayed.passengers.len(), reference_passenger_count(time));
    assert_eq!(replayed.timestamp, time);

    // Marking everything returned as loaded yields no duplicates.
    let loaded: BTreeSet<Order> = payload
        .checkpoints
        .iter()
        .map(|c| c.order)
        .chain(payload.updates.iter().map(|u| u.order))
        .collect();
    let again = engine.resync(&log, time, &loaded).unwrap();
    assert!(again.is_empty());
}

#[test]
fn scrubbing_forward_reuses_loaded_records() {
    let dir = TempDir::new().unwrap();
    let (store, id) = build_session(&dir);
    let log = store.open(&id).unwrap();
    let engine = ReplayEngine::new(RADIUS);

    let first = engine.resync(&log, 100.0, &BTreeSet::new()).unwrap();
    let loaded: BTreeSet<Order> = first
        .checkpoints
        .iter()
        .map(|c| c.order)
        .chain(first.updates.iter().map(|u| u.order))
        .collect();

    // A nearby seek is already covered by the window: nothing to send.
    let nearby = engine.resync(&log, 130.0, &loaded).unwrap();
    assert!(nearby.is_empty());

    // A far seek returns only records the viewer does not hold yet.
    let far = engine.resync(&log, 900.0, &loaded).unwrap();
    assert!(!far.is_empty());
    for checkpoint in &far.checkpoints {
        assert!(!loaded.contains(&checkpoint.order));
    }
    for update in &far.updates {
        assert!(!loaded.contains(&update.order));
    }
}

#[test]
fn header_records_final_bounds() {
    let dir = TempDir::new().unwrap();
    let (store, id) = build_session(&dir);
    let log = store.open(&id).unwrap();

    let header = log.read_header().unwrap();
    assert_eq!(header.simulation_start_time, Some(0.0));
    assert_eq!(header.simulation_end_time, Some((EVENTS - 1) as f64 / 10.0));
    // 10,000 updates plus 11 interleaved checkpoints, zero-based: the last
    // record sits at order 10,010.
    assert_eq!(header.last_update_order, Some(EVENTS + EVENTS / STEP));
}
