//! The device capability trait and its error type.

use scope_types::{DeviceIdentity, ResolvedTiming, TriggerConfig, TriggerConfigError};
use thiserror::Error;

/// Errors from the device layer.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// A vendor driver call failed or the unit disconnected. Fatal for the
    /// acquisition loop that owns the unit; there is no in-place retry.
    #[error("device i/o failure in {operation}: {message}")]
    DeviceIo {
        operation: &'static str,
        message: String,
    },
    #[error("invalid trigger configuration: {0}")]
    InvalidConfig(#[from] TriggerConfigError),
}

impl ScopeError {
    pub fn device_io(operation: &'static str, err: impl std::fmt::Display) -> Self {
        ScopeError::DeviceIo {
            operation,
            message: err.to_string(),
        }
    }

    /// Name of the operation that failed, for the durable error log.
    pub fn operation(&self) -> &str {
        match self {
            ScopeError::DeviceIo { operation, .. } => operation,
            ScopeError::InvalidConfig(_) => "configure_trigger",
        }
    }
}

/// One connected oscilloscope unit.
///
/// Contract: `run_block` must be called before each `poll_ready` /
/// `read_samples` pair. Reading samples before `poll_ready` returns `true`
/// yields stale data (this matches the underlying device semantics), so the
/// state machine never does it.
pub trait ScopeDevice: Send {
    /// Identity fetched once at connection time.
    fn identity(&self) -> &DeviceIdentity;

    /// Enables the capture channel at the fixed input range.
    fn configure_channel(&mut self) -> Result<(), ScopeError>;

    /// Programs the trigger comparator from the resolved timing and the
    /// user-facing trigger parameters.
    fn configure_trigger(
        &mut self,
        timing: &ResolvedTiming,
        trigger: &TriggerConfig,
    ) -> Result<(), ScopeError>;

    /// Arms one block capture.
    fn run_block(&mut self, timing: &ResolvedTiming) -> Result<(), ScopeError>;

    /// True once the armed block has triggered and finished collecting.
    fn poll_ready(&mut self) -> Result<bool, ScopeError>;

    /// Reads back the captured raw samples.
    fn read_samples(&mut self, timing: &ResolvedTiming) -> Result<Vec<i16>, ScopeError>;

    /// Stops the unit and releases the handle. Best-effort; failures are
    /// logged, not propagated.
    fn shutdown(&mut self);
}
