//! In-memory vendor bindings for tests and simulated operation.
//!
//! Units arm, trigger and return a synthetic biphasic stimulation pulse with
//! a little noise on top. Tests can fire triggers by hand, make a unit fail,
//! and inspect the exact parameters the device layer programmed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::bindings::{BindingsError, Channel, ScopeBindings, ThresholdDirection, UnitHandle};

/// Last trigger programming a unit received.
#[derive(Debug, Clone, Default)]
pub struct RecordedTriggerSetup {
    pub threshold: i16,
    pub direction: Option<ThresholdDirection>,
    pub delay: i16,
    pub auto_trigger_ms: i16,
}

/// Last block-capture arming a unit received.
#[derive(Debug, Clone, Copy)]
pub struct RecordedBlock {
    pub pre_samples: i32,
    pub post_samples: i32,
    pub timebase: u32,
    pub oversample: i16,
}

struct MockUnit {
    serial: String,
    trigger: RecordedTriggerSetup,
    block: Option<RecordedBlock>,
    armed_at: Option<Instant>,
    fired: bool,
    failing: bool,
    closed: bool,
}

impl MockUnit {
    fn new(serial: String) -> Self {
        Self {
            serial,
            trigger: RecordedTriggerSetup::default(),
            block: None,
            armed_at: None,
            fired: false,
            failing: false,
            closed: false,
        }
    }

    fn check_usable(&self) -> Result<(), BindingsError> {
        if self.closed {
            return Err(BindingsError("unit is closed".to_string()));
        }
        if self.failing {
            return Err(BindingsError("injected hardware fault".to_string()));
        }
        Ok(())
    }
}

struct MockState {
    unopened: Vec<String>,
    next_handle: UnitHandle,
    units: HashMap<UnitHandle, MockUnit>,
}

pub struct MockScopeBindings {
    state: Mutex<MockState>,
    /// When set, an armed unit reports ready this long after `run_block`.
    auto_fire_after: Option<Duration>,
}

impl MockScopeBindings {
    pub fn new(serials: Vec<String>) -> Self {
        Self {
            state: Mutex::new(MockState {
                unopened: serials,
                next_handle: 1,
                units: HashMap::new(),
            }),
            auto_fire_after: None,
        }
    }

    /// Units trigger on their own, `delay` after each arming.
    pub fn with_auto_fire(serials: Vec<String>, delay: Duration) -> Self {
        Self {
            auto_fire_after: Some(delay),
            ..Self::new(serials)
        }
    }

    fn with_unit<T>(
        &self,
        handle: UnitHandle,
        f: impl FnOnce(&mut MockUnit) -> Result<T, BindingsError>,
    ) -> Result<T, BindingsError> {
        let mut state = self.state.lock().unwrap();
        let unit = state
            .units
            .get_mut(&handle)
            .ok_or_else(|| BindingsError(format!("no open unit with handle {handle}")))?;
        f(unit)
    }

    fn find_serial<T>(
        &self,
        serial: &str,
        f: impl FnOnce(&mut MockUnit) -> T,
    ) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        state
            .units
            .values_mut()
            .find(|u| u.serial == serial)
            .map(f)
    }

    /// Fires the trigger on one armed unit.
    pub fn fire(&self, serial: &str) -> bool {
        self.find_serial(serial, |unit| {
            if unit.armed_at.is_some() {
                unit.fired = true;
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }

    /// Makes every vendor call on one unit fail from now on.
    pub fn inject_failure(&self, serial: &str) {
        self.find_serial(serial, |unit| unit.failing = true);
    }

    pub fn trigger_setup(&self, serial: &str) -> Option<RecordedTriggerSetup> {
        self.find_serial(serial, |unit| unit.trigger.clone())
    }

    pub fn last_block(&self, serial: &str) -> Option<RecordedBlock> {
        self.find_serial(serial, |unit| unit.block).flatten()
    }

    pub fn is_closed(&self, serial: &str) -> bool {
        self.find_serial(serial, |unit| unit.closed).unwrap_or(false)
    }
}

/// A biphasic pulse near the front quarter of the window, riding on noise.
/// Raw values scale so that full scale is ±20 V.
fn synth_stim_raw(count: usize) -> Vec<i16> {
    let mut rng = rand::thread_rng();
    let pulse_start = count / 4;
    let pulse_len = (count / 10).max(1);
    (0..count)
        .map(|i| {
            let volts = if i >= pulse_start && i < pulse_start + pulse_len {
                8.0
            } else if i >= pulse_start + pulse_len && i < pulse_start + 2 * pulse_len {
                -8.0
            } else {
                0.0
            };
            let noise: f64 = rng.gen_range(-0.05..0.05);
            ((volts + noise) / 20.0 * f64::from(i16::MAX)) as i16
        })
        .collect()
}

impl ScopeBindings for MockScopeBindings {
    fn open_unit(&self) -> Option<UnitHandle> {
        let mut state = self.state.lock().unwrap();
        if state.unopened.is_empty() {
            return None;
        }
        let serial = state.unopened.remove(0);
        let handle = state.next_handle;
        state.next_handle += 1;
        state.units.insert(handle, MockUnit::new(serial));
        Some(handle)
    }

    fn unit_serial(&self, handle: UnitHandle) -> Result<String, BindingsError> {
        self.with_unit(handle, |unit| {
            unit.check_usable()?;
            Ok(unit.serial.clone())
        })
    }

    fn set_channel(
        &self,
        handle: UnitHandle,
        _channel: Channel,
        _enabled: bool,
        _dc_coupled: bool,
        _range: u32,
    ) -> Result<(), BindingsError> {
        self.with_unit(handle, |unit| unit.check_usable())
    }

    fn set_trigger(
        &self,
        handle: UnitHandle,
        _channel: Channel,
        threshold: i16,
        direction: ThresholdDirection,
        delay: i16,
        auto_trigger_ms: i16,
    ) -> Result<(), BindingsError> {
        self.with_unit(handle, |unit| {
            unit.check_usable()?;
            unit.trigger = RecordedTriggerSetup {
                threshold,
                direction: Some(direction),
                delay,
                auto_trigger_ms,
            };
            Ok(())
        })
    }

    fn run_block(
        &self,
        handle: UnitHandle,
        pre_samples: i32,
        post_samples: i32,
        timebase: u32,
        oversample: i16,
    ) -> Result<i32, BindingsError> {
        self.with_unit(handle, |unit| {
            unit.check_usable()?;
            unit.block = Some(RecordedBlock {
                pre_samples,
                post_samples,
                timebase,
                oversample,
            });
            unit.armed_at = Some(Instant::now());
            unit.fired = false;
            Ok(0)
        })
    }

    fn is_ready(&self, handle: UnitHandle) -> Result<bool, BindingsError> {
        let auto_fire_after = self.auto_fire_after;
        self.with_unit(handle, |unit| {
            unit.check_usable()?;
            if let (Some(delay), Some(armed_at)) = (auto_fire_after, unit.armed_at) {
                if armed_at.elapsed() >= delay {
                    unit.fired = true;
                }
            }
            Ok(unit.fired)
        })
    }

    fn get_values(
        &self,
        handle: UnitHandle,
        count: usize,
    ) -> Result<(Vec<i16>, bool), BindingsError> {
        self.with_unit(handle, |unit| {
            unit.check_usable()?;
            if unit.fired {
                Ok((synth_stim_raw(count), false))
            } else {
                // Stale read: the real hardware hands back whatever is in the
                // buffer. Callers are contractually required not to do this.
                Ok((vec![0; count], false))
            }
        })
    }

    fn stop(&self, handle: UnitHandle) -> Result<(), BindingsError> {
        self.with_unit(handle, |unit| {
            unit.armed_at = None;
            unit.fired = false;
            Ok(())
        })
    }

    fn close_unit(&self, handle: UnitHandle) -> Result<(), BindingsError> {
        self.with_unit(handle, |unit| {
            unit.closed = true;
            Ok(())
        })
    }
}
