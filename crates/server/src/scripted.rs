//! File-driven engine adapter.
//!
//! The optimization engine that actually computes vehicle and passenger
//! behavior is an external collaborator. This adapter is the thin end of
//! that boundary: it replays a pre-recorded domain event stream from
//! `events.jsonl` inside the dataset directory, one JSON event per line,
//! already ordered by simulated time.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use transitviz_core::Timestamp;
use transitviz_runtime::worker::{DomainEvent, EventSource};

pub struct ScriptedSource {
    events: VecDeque<DomainEvent>,
    estimated_end_time: Timestamp,
    max_time: Option<Timestamp>,
}

impl ScriptedSource {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?;

        let mut events = VecDeque::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: DomainEvent = serde_json::from_str(&line)
                .with_context(|| format!("invalid event on line {}", number + 1))?;
            events.push_back(event);
        }

        let estimated_end_time = events.back().map(DomainEvent::time).unwrap_or(0.0);
        Ok(Self {
            events,
            estimated_end_time,
            max_time: None,
        })
    }
}

impl EventSource for ScriptedSource {
    fn next_event(&mut self) -> Option<DomainEvent> {
        let event = self.events.front()?;
        // A max-time cap truncates the run at the first event beyond it.
        if let Some(max_time) = self.max_time
            && event.time() > max_time
        {
            return None;
        }
        self.events.pop_front()
    }

    fn estimated_end_time(&self) -> Timestamp {
        self.estimated_end_time
    }

    fn set_max_time(&mut self, max_time: Option<Timestamp>) {
        self.max_time = max_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_events(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("events.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            "{}",
            "{\"event\":\"passengerReleased\",\"time\":1.0,\"id\":\"p-1\",\"name\":null}"
        )
        .unwrap();
        writeln!(
            file,
            "{}",
            "{\"event\":\"passengerAssigned\",\"time\":5.0,\"id\":\"p-1\"}"
        )
        .unwrap();
        path
    }

    #[test]
    fn replays_events_in_order() {
        let dir = TempDir::new().unwrap();
        let path = write_events(&dir);
        let mut source = ScriptedSource::load(&path).unwrap();

        assert_eq!(source.estimated_end_time(), 5.0);
        assert_eq!(source.next_event().unwrap().time(), 1.0);
        assert_eq!(source.next_event().unwrap().time(), 5.0);
        assert!(source.next_event().is_none());
    }

    #[test]
    fn max_time_truncates_the_stream() {
        let dir = TempDir::new().unwrap();
        let path = write_events(&dir);
        let mut source = ScriptedSource::load(&path).unwrap();

        source.set_max_time(Some(2.0));
        assert_eq!(source.next_event().unwrap().time(), 1.0);
        assert!(source.next_event().is_none());

        // Raising the cap resumes where the stream left off.
        source.set_max_time(None);
        assert_eq!(source.next_event().unwrap().time(), 5.0);
    }
}
