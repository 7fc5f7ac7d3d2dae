//! A single-writer file lock over one data directory: an open database
//! session holds a `.lock` sentinel file for its duration, and a second
//! process opening the same directory blocks, with a timeout, rather than
//! corrupting shared state.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Held for the lifetime of an open database session. Removes the
/// sentinel file on drop so a crashed process doesn't wedge later opens
/// forever. A lock held past its caller's timeout is treated as a bug in
/// the holder, not something this layer papers over.
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(_) => return Ok(DirLock { path: path.to_path_buf() }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(Error::Io(format!(
                            "timed out after {:?} waiting for lock at {}",
                            timeout,
                            path.display()
                        )));
                    }
                    sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(Error::from(e)),
            }
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("failed to remove lock file {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_times_out_while_first_holds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");
        let _first = DirLock::acquire(&path, Duration::from_secs(5)).unwrap();

        let err = DirLock::acquire(&path, Duration::from_millis(120));
        assert!(err.is_err());
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");
        {
            let _guard = DirLock::acquire(&path, Duration::from_secs(5)).unwrap();
        }
        assert!(DirLock::acquire(&path, Duration::from_secs(1)).is_ok());
    }
}
