//! Typed configuration consumed by the daemon.
//!
//! The daemon's parser produces these from the line-oriented config file; the
//! core only ever sees the parsed form.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::data::TriggerConfig;

/// One booth definition tuple: which unit is wired to which booth, how it
/// triggers, and how the (external) display layer should present it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoothDefinition {
    pub serial_code: String,
    pub booth_number: u32,
    pub trigger: TriggerConfig,
    /// Display preferences, carried opaquely for the presentation layer.
    pub session_display: String,
    pub trace_display: String,
}

/// Process-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub booths: Vec<BoothDefinition>,
    /// Primary and secondary storage roots. Each is attempted independently;
    /// persistence is best-effort-redundant, not all-or-nothing.
    pub primary_path: Option<PathBuf>,
    pub secondary_path: Option<PathBuf>,
    /// Optional group directory inserted between the base path and the booth
    /// directory.
    pub group_id: Option<String>,
    /// When set, every capture is appended to the booth logs regardless of
    /// active session state.
    pub passive_collection_enabled: bool,
}

impl SystemConfig {
    /// Configured storage roots in priority order (primary first).
    pub fn base_paths(&self) -> Vec<PathBuf> {
        [&self.primary_path, &self.secondary_path]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn booth_for_serial(&self, serial_code: &str) -> Option<&BoothDefinition> {
        self.booths.iter().find(|b| b.serial_code == serial_code)
    }
}
