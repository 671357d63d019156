//! PicoScope 2206B-class units.
//!
//! This generation positions the trigger from the separate pre/post sample
//! counts handed to `run_block`; the trigger call itself carries no delay.

use std::sync::Arc;

use log::warn;
use scope_types::{DeviceIdentity, ResolvedTiming, ScopeFamily, TriggerConfig, TriggerEdge};

use crate::bindings::{Channel, ScopeBindings, ThresholdDirection, UnitHandle, RANGE_20V};
use crate::types::{ScopeDevice, ScopeError};

pub struct Ps2206b {
    bindings: Arc<dyn ScopeBindings>,
    handle: UnitHandle,
    identity: DeviceIdentity,
}

impl Ps2206b {
    /// Wraps an already-opened unit, fetching its serial code once.
    pub fn open(bindings: Arc<dyn ScopeBindings>, handle: UnitHandle) -> Result<Self, ScopeError> {
        let serial = bindings
            .unit_serial(handle)
            .map_err(|e| ScopeError::device_io("unit_serial", e))?;
        Ok(Self {
            bindings,
            handle,
            identity: DeviceIdentity {
                serial_code: serial.trim().to_string(),
                family: ScopeFamily::Ps2206b,
                max_digital_value: i32::from(i16::MAX),
                max_voltage_range: 20.0,
            },
        })
    }
}

impl ScopeDevice for Ps2206b {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn configure_channel(&mut self) -> Result<(), ScopeError> {
        self.bindings
            .set_channel(self.handle, Channel::A, true, true, RANGE_20V)
            .map_err(|e| ScopeError::device_io("set_channel", e))
    }

    fn configure_trigger(
        &mut self,
        timing: &ResolvedTiming,
        trigger: &TriggerConfig,
    ) -> Result<(), ScopeError> {
        let _ = timing;
        let threshold = (f64::from(self.identity.max_digital_value)
            * (trigger.trigger_voltage / self.identity.max_voltage_range))
            .round()
            .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        let direction = match trigger.trigger_edge {
            TriggerEdge::Rising => ThresholdDirection::Rising,
            TriggerEdge::Falling => ThresholdDirection::Falling,
            TriggerEdge::Above => ThresholdDirection::Above,
            TriggerEdge::Below => ThresholdDirection::Below,
        };
        self.bindings
            .set_trigger(self.handle, Channel::A, threshold, direction, 0, 0)
            .map_err(|e| ScopeError::device_io("set_trigger", e))
    }

    fn run_block(&mut self, timing: &ResolvedTiming) -> Result<(), ScopeError> {
        self.bindings
            .run_block(
                self.handle,
                timing.pre_samples as i32,
                timing.post_samples as i32,
                timing.timebase_code,
                0,
            )
            .map(|_| ())
            .map_err(|e| ScopeError::device_io("run_block", e))
    }

    fn poll_ready(&mut self) -> Result<bool, ScopeError> {
        self.bindings
            .is_ready(self.handle)
            .map_err(|e| ScopeError::device_io("is_ready", e))
    }

    fn read_samples(&mut self, timing: &ResolvedTiming) -> Result<Vec<i16>, ScopeError> {
        let (values, overflow) = self
            .bindings
            .get_values(self.handle, timing.total_samples())
            .map_err(|e| ScopeError::device_io("get_values", e))?;
        if overflow {
            warn!(
                "scope {}: input overflow during capture",
                self.identity.serial_code
            );
        }
        Ok(values)
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.bindings.stop(self.handle) {
            warn!("scope {}: stop failed: {}", self.identity.serial_code, e);
        }
        if let Err(e) = self.bindings.close_unit(self.handle) {
            warn!(
                "scope {}: close_unit failed: {}",
                self.identity.serial_code, e
            );
        }
    }
}
