//! Single-instance guard.
//!
//! Two daemons appending to the same booth files would interleave lines, so
//! startup takes an exclusive lock file and refuses to run if one is already
//! held. The file is removed on clean shutdown; a stale lock after a crash
//! must be deleted by the operator, which is deliberate: it forces a look at
//! `errors.txt` first.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstanceLockError {
    #[error("another instance is already running (lock file {0} exists)")]
    AlreadyRunning(PathBuf),
    #[error("could not create lock file: {0}")]
    Io(#[from] io::Error),
}

pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Acquires the lock, failing if the file already exists.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, InstanceLockError> {
        let path = path.into();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(InstanceLockError::AlreadyRunning(path));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("failed to remove instance lock {:?}: {e}", self.path);
        }
    }
}
