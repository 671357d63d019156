//! Acquisition daemon for booth-mounted nerve-stimulation oscilloscopes.
//!
//! The daemon discovers connected units, runs one acquisition loop per unit
//! ([`acquisition`]), and fans captures out to crash-safe booth logs and
//! session summaries ([`persistence`]) under the control of a per-device
//! session gate ([`supervisor`]).

pub mod acquisition;
pub mod config;
pub mod error_log;
pub mod instance_lock;
pub mod persistence;
pub mod supervisor;
