//! Per-file advisory locking.
//!
//! The writer (worker process) and readers (server query/replay calls) are
//! different OS processes, so serialization happens through an advisory
//! lock on a companion `.lock` file rather than in-memory mutexes. The lock
//! is held only for the duration of one append, read or header rewrite.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// RAII guard over a session file's companion lock file.
///
/// Blocks until the lock is acquired; released on drop (and by the OS if
/// the process dies mid-hold).
pub struct FileGuard {
    file: File,
}

impl FileGuard {
    /// Acquire the advisory lock guarding `data_path`.
    pub fn acquire(data_path: &Path) -> io::Result<Self> {
        let lock_path = lock_path_for(data_path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        // Errors on unlock are unrecoverable here; the OS releases the lock
        // when the descriptor closes anyway.
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

fn lock_path_for(data_path: &Path) -> PathBuf {
    let mut os = data_path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_file_sits_beside_the_data_file() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("simulation.jsonl");
        let guard = FileGuard::acquire(&data).unwrap();
        assert!(dir.path().join("simulation.jsonl.lock").exists());
        drop(guard);

        // Reacquirable after release.
        let _guard = FileGuard::acquire(&data).unwrap();
    }
}
