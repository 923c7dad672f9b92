//! Append-only per-session log files.
//!
//! Each session owns one directory under the simulations root:
//!
//! ```text
//! {root}/{session_id}/
//!   ├── simulation.jsonl        ← header line, then updates + checkpoints
//!   ├── simulation.jsonl.lock   ← advisory lock companion
//!   ├── polylines.json          ← route geometry side table
//!   └── .corrupted              ← empty sentinel, present once corrupted
//! ```
//!
//! Exactly one worker writes a session at a time; the lock serializes that
//! writer against concurrent read-side queries and against the end-of-run
//! header rewrite.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use transitviz_core::{
    Environment, Header, MalformedRecord, SimulationId, Update, VersionClass, decode, encode,
};

use super::error::{Result, StoreError};
use super::lock::FileGuard;

const LOG_FILE_NAME: &str = "simulation.jsonl";
const CORRUPTED_FILE_NAME: &str = ".corrupted";

/// Factory for per-session log handles under the simulations root.
#[derive(Debug, Clone)]
pub struct LogStore {
    root: PathBuf,
}

impl LogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the session directory exists and return a handle to it.
    pub fn open(&self, id: &SimulationId) -> Result<SessionLog> {
        let dir = self.root.join(id.as_str());
        fs::create_dir_all(&dir)?;
        Ok(SessionLog {
            id: id.clone(),
            log_path: dir.join(LOG_FILE_NAME),
            dir,
        })
    }

    /// Session ids discovered from the directory layout, sorted by id
    /// (which is creation order).
    pub fn list_sessions(&self) -> Result<Vec<SimulationId>> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(SimulationId::from_raw(name));
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Handle to one session's on-disk data.
pub struct SessionLog {
    pub(super) id: SimulationId,
    pub(super) dir: PathBuf,
    log_path: PathBuf,
}

impl SessionLog {
    pub fn id(&self) -> &SimulationId {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn malformed(&self, source: MalformedRecord) -> StoreError {
        StoreError::Malformed {
            path: self.log_path.clone(),
            source,
        }
    }

    /// Write the header line if the log file is new; no-op otherwise.
    pub fn init_header(&self, header: &Header) -> Result<()> {
        let _guard = FileGuard::acquire(&self.log_path)?;
        let has_content = self
            .log_path
            .metadata()
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if has_content {
            return Ok(());
        }

        let line = encode(header).map_err(|err| self.malformed(err))?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.log_path)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        tracing::debug!("initialized session log {}", self.log_path.display());
        Ok(())
    }

    /// Read and decode the header line.
    pub fn read_header(&self) -> Result<Header> {
        let _guard = FileGuard::acquire(&self.log_path)?;
        self.read_header_locked()
    }

    fn read_header_locked(&self) -> Result<Header> {
        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::HeaderMissing(self.id.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        let mut line = String::new();
        BufReader::new(file).read_line(&mut line)?;
        if line.trim().is_empty() {
            return Err(StoreError::HeaderMissing(self.id.clone()));
        }
        decode(&line).map_err(|err| self.malformed(err))
    }

    /// Append one encoded update line under the file lock.
    pub fn append_update(&self, update: &Update) -> Result<()> {
        let line = encode(update).map_err(|err| self.malformed(err))?;
        self.append_line(&line)
    }

    /// Append one encoded checkpoint line under the file lock.
    ///
    /// The writer calls this *before* applying the triggering update to its
    /// in-memory environment, so a checkpoint precedes, and never includes,
    /// the update that shares its log position.
    pub fn append_checkpoint(&self, environment: &Environment) -> Result<()> {
        let line = encode(environment).map_err(|err| self.malformed(err))?;
        self.append_line(&line)
    }

    fn append_line(&self, line: &str) -> Result<()> {
        let _guard = FileGuard::acquire(&self.log_path)?;
        // No `create`: appending to a log whose header was never written is
        // a bug and must surface as NotFound rather than a headerless file.
        let mut file = OpenOptions::new().append(true).open(&self.log_path)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    /// Atomically replace line 1, preserving every other byte of the file.
    ///
    /// Used once per session, to stamp end-of-run fields into the header
    /// without rewriting the whole log in place.
    pub fn rewrite_header(&self, header: &Header) -> Result<()> {
        let _guard = FileGuard::acquire(&self.log_path)?;
        let line = encode(header).map_err(|err| self.malformed(err))?;

        let mut reader = BufReader::new(File::open(&self.log_path)?);
        let mut old_header = String::new();
        reader.read_line(&mut old_header)?;

        let tmp_path = self.dir.join(format!("{LOG_FILE_NAME}.tmp"));
        {
            let mut tmp = File::create(&tmp_path)?;
            writeln!(tmp, "{line}")?;
            std::io::copy(&mut reader, &mut tmp)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.log_path)?;
        Ok(())
    }

    /// Byte offset of every line, via one forward scan. O(file size).
    ///
    /// The index is derived, not persisted: the file keeps growing, so
    /// callers cache it within one resync request at most.
    pub fn extract_offsets(&self) -> Result<Vec<u64>> {
        let _guard = FileGuard::acquire(&self.log_path)?;
        let mut reader = BufReader::new(File::open(&self.log_path)?);
        let mut offsets = Vec::new();
        let mut position = 0u64;
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            if !line.trim().is_empty() {
                offsets.push(position);
            }
            position += read as u64;
        }
        Ok(offsets)
    }

    /// Read the single line starting at `offset`.
    pub fn read_line_at(&self, offset: u64) -> Result<String> {
        let mut lines = self.read_lines_from(offset, 1)?;
        match lines.pop() {
            Some(line) => Ok(line),
            None => {
                let file_size = self.log_path.metadata().map(|m| m.len()).unwrap_or(0);
                Err(StoreError::InvalidOffset { offset, file_size })
            }
        }
    }

    /// Read up to `count` lines starting at `offset`.
    pub fn read_lines_from(&self, offset: u64, count: usize) -> Result<Vec<String>> {
        let _guard = FileGuard::acquire(&self.log_path)?;
        let file = File::open(&self.log_path)?;
        let file_size = file.metadata()?.len();
        if offset > file_size {
            return Err(StoreError::InvalidOffset { offset, file_size });
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;
        let mut lines = Vec::new();
        let mut line = String::new();
        while lines.len() < count {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let trimmed = line.trim_end();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        Ok(lines)
    }

    /// Permanently exclude this session from normal queries.
    pub fn mark_corrupted(&self) -> Result<()> {
        let path = self.dir.join(CORRUPTED_FILE_NAME);
        if !path.exists() {
            File::create(&path)?;
            tracing::warn!("session {} marked corrupted", self.id);
        }
        Ok(())
    }

    pub fn is_corrupted(&self) -> bool {
        self.dir.join(CORRUPTED_FILE_NAME).exists()
    }

    /// Classify this log's header version against the store's version.
    ///
    /// A decode failure here is corruption, and sticky: the sentinel is
    /// written before the error is returned.
    pub fn classify(&self) -> Result<VersionClass> {
        if self.is_corrupted() {
            return Err(StoreError::Corrupted(self.id.clone()));
        }
        match self.read_header() {
            Ok(header) => Ok(header.version.classify()),
            Err(StoreError::Malformed { path, source }) => {
                tracing::error!(
                    "corrupt header in {}: {source}; marking session corrupted",
                    path.display()
                );
                self.mark_corrupted()?;
                Err(StoreError::Corrupted(self.id.clone()))
            }
            Err(err) => Err(err),
        }
    }
}
