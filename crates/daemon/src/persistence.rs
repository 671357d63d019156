//! Crash-safe capture persistence.
//!
//! Two independent output trees (primary and secondary) receive identical
//! data. A failure on one tree is logged and never blocks the other. Booth
//! logs are append-only and flushed after every line so a power cut loses at
//! most the line in flight.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use dashmap::DashMap;
use scope_types::Capture;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("could not write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Everything accumulated during one active session, written out as a
/// `.scope` summary when the session stops.
pub struct SessionData {
    pub rat_name: String,
    pub booth_number: u32,
    pub serial_code: String,
    pub sample_interval_us: u32,
    pub captures: Vec<Arc<Capture>>,
}

struct BoothStreams {
    date: NaiveDate,
    /// Parallel to `base_paths`; `None` when that tree could not be opened.
    writers: Vec<Option<BufWriter<File>>>,
}

pub struct PersistenceManager {
    base_paths: Vec<PathBuf>,
    group_id: Option<String>,
    booths: DashMap<u32, BoothStreams>,
}

impl PersistenceManager {
    pub fn new(base_paths: Vec<PathBuf>, group_id: Option<String>) -> Self {
        Self {
            base_paths,
            group_id,
            booths: DashMap::new(),
        }
    }

    fn booth_log_path(&self, base: &Path, booth_number: u32, date: NaiveDate) -> PathBuf {
        let mut path = base.to_path_buf();
        if let Some(group) = &self.group_id {
            path.push(group);
        }
        path.push(booth_number.to_string());
        path.push(format!("Booth{booth_number}_{}", date.format("%Y_%m_%d")));
        path
    }

    fn open_streams(&self, booth_number: u32, date: NaiveDate) -> BoothStreams {
        let writers = self
            .base_paths
            .iter()
            .map(|base| {
                let path = self.booth_log_path(base, booth_number, date);
                open_append(&path)
                    .map_err(|e| warn!("booth {booth_number}: could not open {path:?}: {e}"))
                    .ok()
            })
            .collect();
        BoothStreams { date, writers }
    }

    /// Opens (or rolls over) the booth's log streams without writing. Used
    /// so a date change closes yesterday's file even when no stimulation
    /// arrives for a while.
    pub fn refresh_streams(&self, booth_number: u32) {
        let today = Local::now().date_naive();
        let mut entry = self
            .booths
            .entry(booth_number)
            .or_insert_with(|| self.open_streams(booth_number, today));
        if entry.date != today {
            *entry = self.open_streams(booth_number, today);
        }
    }

    /// Appends one capture line to every reachable tree, flushing each
    /// stream before returning.
    pub fn append_capture(&self, booth_number: u32, sample_interval_us: u32, capture: &Capture) {
        let today = Local::now().date_naive();
        let mut entry = self
            .booths
            .entry(booth_number)
            .or_insert_with(|| self.open_streams(booth_number, today));
        if entry.date != today {
            *entry = self.open_streams(booth_number, today);
        } else {
            self.reopen_missing(booth_number, &mut entry);
        }

        let line = capture_line(capture, Some(sample_interval_us));
        for (i, slot) in entry.writers.iter_mut().enumerate() {
            let Some(writer) = slot else { continue };
            let result = writer
                .write_all(line.as_bytes())
                .and_then(|()| writer.flush());
            if let Err(e) = result {
                warn!(
                    "booth {booth_number}: write to {:?} failed, dropping stream: {e}",
                    self.base_paths[i]
                );
                *slot = None;
            }
        }
    }

    /// A write failure drops only that slot, and only until the next append:
    /// a transient error on one tree skips the lines in flight while it was
    /// down, not the rest of the day.
    fn reopen_missing(&self, booth_number: u32, streams: &mut BoothStreams) {
        for (i, slot) in streams.writers.iter_mut().enumerate() {
            if slot.is_some() {
                continue;
            }
            let path = self.booth_log_path(&self.base_paths[i], booth_number, streams.date);
            match open_append(&path) {
                Ok(writer) => {
                    info!("booth {booth_number}: {path:?} is reachable again");
                    *slot = Some(writer);
                }
                Err(e) => debug!("booth {booth_number}: {path:?} still unreachable: {e}"),
            }
        }
    }

    /// Writes the session summary to every tree. Each tree succeeds or fails
    /// independently; callers get one result per base path.
    pub fn finalize_session(&self, session: &SessionData) -> Vec<Result<PathBuf, PersistenceError>> {
        let now = Local::now();
        let file_name = format!("{}_{}.scope", session.rat_name, now.format("%Y%m%d_%H%M"));
        self.base_paths
            .iter()
            .map(|base| {
                let path = base.join(&session.rat_name).join(&file_name);
                write_scope_file(&path, session)
                    .map(|()| path.clone())
                    .map_err(|source| PersistenceError::Io { path, source })
            })
            .collect()
    }

    /// Flushes and closes every open booth stream.
    pub fn close_all(&self) {
        for mut entry in self.booths.iter_mut() {
            for slot in entry.writers.iter_mut() {
                if let Some(writer) = slot {
                    if let Err(e) = writer.flush() {
                        warn!("flush on close failed: {e}");
                    }
                }
                *slot = None;
            }
        }
        self.booths.clear();
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// One capture as a log line: timestamp, optional sample interval, then every
/// sample voltage to two decimals. CRLF-terminated for compatibility with the
/// established file format.
fn capture_line(capture: &Capture, sample_interval_us: Option<u32>) -> String {
    let mut line = capture.timestamp.format("%Y-%m-%d:%H:%M:%S:%6f").to_string();
    if let Some(us) = sample_interval_us {
        line.push_str(&format!(", {us}"));
    }
    for sample in &capture.samples {
        line.push_str(&format!(", {sample:.2}"));
    }
    line.push_str("\r\n");
    line
}

fn write_scope_file(path: &Path, session: &SessionData) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);

    let max_voltages: Vec<f64> = session.captures.iter().map(|c| c.max_voltage()).collect();
    let min_voltages: Vec<f64> = session.captures.iter().map(|c| c.min_voltage()).collect();
    let peak_to_peak: Vec<f64> = max_voltages
        .iter()
        .zip(&min_voltages)
        .map(|(max, min)| max - min)
        .collect();

    write!(writer, "ScopeVNS Version: 4\r\n")?;
    write!(writer, "Rat name: {}\r\n", session.rat_name)?;
    write!(writer, "Booth number: {}\r\n", session.booth_number)?;
    write!(writer, "Scope serial code: {}\r\n", session.serial_code)?;
    write!(writer, "Scope channel: A\r\n")?;
    write!(
        writer,
        "Scope microseconds per sample: {}\r\n",
        session.sample_interval_us
    )?;
    write!(
        writer,
        "Save date: {}\r\n",
        Local::now().format("%Y-%m-%d:%H:%M:%S")
    )?;
    write!(writer, "Max voltage (median): {}\r\n", median(&max_voltages))?;
    write!(writer, "Min voltage (median): {}\r\n", median(&min_voltages))?;
    write!(
        writer,
        "Peak-to-peak voltage (median): {}\r\n",
        median(&peak_to_peak)
    )?;
    write!(
        writer,
        "Number of stims detected: {}\r\n",
        session.captures.len()
    )?;
    for capture in &session.captures {
        writer.write_all(capture_line(capture, None).as_bytes())?;
    }
    writer.flush()
}

/// Median of an unsorted slice. Even-length input averages the two middle
/// values; an empty slice yields NaN, which the summary prints as "NaN".
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}
