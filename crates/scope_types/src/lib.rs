//! Shared types for the ScopeVNS acquisition daemon.
//!
//! Everything in this crate is plain data: the capture/trigger model that the
//! device crate and the daemon both consume, the event enum fanned out to
//! whatever consumer registers interest, and the typed configuration produced
//! by the daemon's config parser.

pub mod config;
pub mod data;
pub mod event;

pub use config::{BoothDefinition, SystemConfig};
pub use data::{
    Capture, DeviceIdentity, ResolvedTiming, ScopeFamily, TriggerConfig, TriggerConfigError,
    TriggerEdge,
};
pub use event::{AcquisitionEvent, SessionState};
