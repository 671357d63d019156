//! Durable error log.
//!
//! Device faults must survive a daemon crash, so each block is appended to
//! `errors.txt` in the working directory and flushed before the call returns.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one timestamped block. Returns the write error rather than
    /// panicking; a failing error log must never take the daemon down.
    pub fn append(&self, context: &str, detail: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        write!(
            file,
            "{}\r\n{context}\r\n{detail}\r\n\r\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        file.flush()
    }
}
