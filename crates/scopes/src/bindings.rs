//! Abstract vendor-driver contract.
//!
//! The bit-level SDK calls are supplied by a collaborator per device family;
//! this trait is the shape of that collaborator. One instance exists per
//! family and hands out unit handles through repeated `open_unit` probing.

use thiserror::Error;

/// Opaque per-unit handle issued by the vendor driver.
pub type UnitHandle = i16;

/// Capture channel selector. Only channel A is wired up in this system, but
/// the vendor contract is channel-addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    A,
    B,
}

/// Trigger direction codes shared by both SDK generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdDirection {
    Above,
    Below,
    Rising,
    Falling,
}

/// Input range selector for the widest range (±20 V); the only range this
/// system records at.
pub const RANGE_20V: u32 = 10;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct BindingsError(pub String);

/// Vendor driver operations for one device family.
pub trait ScopeBindings: Send + Sync {
    /// Opens the next unopened unit of this family, or `None` when the driver
    /// reports no more units.
    fn open_unit(&self) -> Option<UnitHandle>;

    /// Fetches the unit's serial code.
    fn unit_serial(&self, handle: UnitHandle) -> Result<String, BindingsError>;

    fn set_channel(
        &self,
        handle: UnitHandle,
        channel: Channel,
        enabled: bool,
        dc_coupled: bool,
        range: u32,
    ) -> Result<(), BindingsError>;

    /// Programs the trigger. `delay` is family-specific: the 2204A generation
    /// interprets it as a signed percentage of the capture window, the 2206B
    /// generation ignores it in favor of the pre/post split in `run_block`.
    fn set_trigger(
        &self,
        handle: UnitHandle,
        channel: Channel,
        threshold: i16,
        direction: ThresholdDirection,
        delay: i16,
        auto_trigger_ms: i16,
    ) -> Result<(), BindingsError>;

    /// Arms one block capture. Returns the driver's "time indisposed"
    /// estimate in milliseconds.
    fn run_block(
        &self,
        handle: UnitHandle,
        pre_samples: i32,
        post_samples: i32,
        timebase: u32,
        oversample: i16,
    ) -> Result<i32, BindingsError>;

    fn is_ready(&self, handle: UnitHandle) -> Result<bool, BindingsError>;

    /// Reads back up to `count` captured samples plus an overflow flag.
    fn get_values(&self, handle: UnitHandle, count: usize)
        -> Result<(Vec<i16>, bool), BindingsError>;

    fn stop(&self, handle: UnitHandle) -> Result<(), BindingsError>;

    fn close_unit(&self, handle: UnitHandle) -> Result<(), BindingsError>;
}
