//! Event types fanned out by the acquisition supervisor.
//!
//! The core publishes these on a broadcast channel; GUI layers, loggers and
//! test harnesses subscribe without the core knowing who is listening.

use std::sync::Arc;

use crate::data::Capture;

/// Whether a booth's active session gates the state machine open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotRunning,
    Running,
}

/// Events published by the acquisition supervisor.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    /// A device completed one triggered capture.
    CaptureReady {
        serial_code: String,
        booth_number: Option<u32>,
        sample_interval_us: u32,
        capture: Arc<Capture>,
    },
    /// A device I/O call failed. Fatal for that unit's acquisition loop;
    /// other devices are unaffected.
    DeviceFault {
        serial_code: String,
        operation: String,
        message: String,
    },
    SessionStarted {
        serial_code: String,
        rat_name: String,
    },
    SessionStopped {
        serial_code: String,
        capture_count: usize,
    },
}
