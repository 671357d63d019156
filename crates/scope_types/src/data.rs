//! Core acquisition data model.

use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Oscilloscope families this program can connect to. The two families speak
/// different vendor SDK generations and encode trigger parameters
/// differently, but expose the same capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeFamily {
    Ps2204a,
    Ps2206b,
}

/// Which side of the trigger threshold fires a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEdge {
    Rising,
    Falling,
    Above,
    Below,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized trigger edge: {0:?}")]
pub struct ParseTriggerEdgeError(String);

impl FromStr for TriggerEdge {
    type Err = ParseTriggerEdgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Config files write the long names; accept the short forms too.
        match s.trim() {
            "RisingEdge" | "Rising" => Ok(TriggerEdge::Rising),
            "FallingEdge" | "Falling" => Ok(TriggerEdge::Falling),
            "Above" => Ok(TriggerEdge::Above),
            "Below" => Ok(TriggerEdge::Below),
            other => Err(ParseTriggerEdgeError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TriggerConfigError {
    #[error("pre-trigger plus post-trigger duration must be positive")]
    EmptyCaptureWindow,
    #[error("desired sample interval must be positive")]
    NonPositiveSampleInterval,
}

/// Triggering parameters for one oscilloscope, all durations in microseconds.
///
/// Immutable once applied to a device: changing any field requires deriving a
/// fresh [`ResolvedTiming`] and reconfiguring the unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Recording duration ahead of the trigger. May be negative, which skips
    /// the first part of the post-trigger window instead.
    pub pre_trigger_us: i64,
    /// Recording duration after the trigger. Never negative.
    pub post_trigger_us: i64,
    /// Requested sample interval; the device quantizes it to the nearest
    /// legal value.
    pub desired_sample_interval_us: i64,
    /// Threshold voltage for the trigger comparator.
    pub trigger_voltage: f64,
    pub trigger_edge: TriggerEdge,
    /// Minimum enforced wait after a capture before re-arming.
    pub refractory_us: i64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            pre_trigger_us: -100,
            post_trigger_us: 500_000,
            desired_sample_interval_us: 1,
            trigger_voltage: 1.0,
            trigger_edge: TriggerEdge::Falling,
            refractory_us: 0,
        }
    }
}

impl TriggerConfig {
    pub fn validate(&self) -> Result<(), TriggerConfigError> {
        if self.pre_trigger_us + self.post_trigger_us <= 0 {
            return Err(TriggerConfigError::EmptyCaptureWindow);
        }
        if self.desired_sample_interval_us <= 0 {
            return Err(TriggerConfigError::NonPositiveSampleInterval);
        }
        Ok(())
    }
}

/// Timing values derived from a [`TriggerConfig`] for a specific device
/// family. Must be recomputed whenever the trigger config or the device
/// identity changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTiming {
    /// Actual sample interval, always a member of the family's legal set.
    pub sample_interval_ns: i64,
    /// Device-specific timebase code selecting that interval.
    pub timebase_code: u32,
    /// Sample counts on each side of the trigger. Each side is quantized
    /// independently (truncating division), so the split is reproducible
    /// across restarts.
    pub pre_samples: i64,
    pub post_samples: i64,
}

impl ResolvedTiming {
    pub fn total_samples(&self) -> usize {
        (self.pre_samples + self.post_samples).max(0) as usize
    }

    /// Sample interval rounded to whole microseconds, as written to the
    /// persisted capture logs and session summaries.
    pub fn sample_interval_us(&self) -> u32 {
        (self.sample_interval_ns as f64 / 1000.0).round() as u32
    }
}

/// Identity of one connected unit, fetched once at connection time and
/// immutable for the lifetime of the handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub serial_code: String,
    pub family: ScopeFamily,
    /// Largest raw digital value the unit reports; full scale maps to
    /// `max_voltage_range`.
    pub max_digital_value: i32,
    /// Full-scale input range in volts.
    pub max_voltage_range: f64,
}

impl DeviceIdentity {
    /// Converts a raw digital sample to volts.
    pub fn volts_from_raw(&self, raw: i16) -> f64 {
        self.max_voltage_range * f64::from(raw) / f64::from(self.max_digital_value)
    }
}

/// One triggered waveform recording (a "stimulation train").
///
/// Immutable once produced; consumers receive their own copy and never share
/// mutable state.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub timestamp: DateTime<Local>,
    /// Converted sample voltages, in capture order.
    pub samples: Vec<f64>,
}

impl Capture {
    pub fn max_voltage(&self) -> f64 {
        self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min_voltage(&self) -> f64 {
        self.samples.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_edge_parses_config_names() {
        assert_eq!("RisingEdge".parse(), Ok(TriggerEdge::Rising));
        assert_eq!("FallingEdge".parse(), Ok(TriggerEdge::Falling));
        assert_eq!("Above".parse(), Ok(TriggerEdge::Above));
        assert_eq!("Below".parse(), Ok(TriggerEdge::Below));
        assert!("Sideways".parse::<TriggerEdge>().is_err());
    }

    #[test]
    fn trigger_config_rejects_empty_window() {
        let config = TriggerConfig {
            pre_trigger_us: -500,
            post_trigger_us: 500,
            ..TriggerConfig::default()
        };
        assert_eq!(config.validate(), Err(TriggerConfigError::EmptyCaptureWindow));
    }

    #[test]
    fn trigger_config_rejects_zero_interval() {
        let config = TriggerConfig {
            desired_sample_interval_us: 0,
            ..TriggerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(TriggerConfigError::NonPositiveSampleInterval)
        );
    }

    #[test]
    fn default_trigger_config_is_valid() {
        assert!(TriggerConfig::default().validate().is_ok());
    }

    #[test]
    fn raw_sample_conversion_spans_full_range() {
        let identity = DeviceIdentity {
            serial_code: "TEST".to_string(),
            family: ScopeFamily::Ps2204a,
            max_digital_value: i32::from(i16::MAX),
            max_voltage_range: 20.0,
        };
        assert_eq!(identity.volts_from_raw(i16::MAX), 20.0);
        assert_eq!(identity.volts_from_raw(0), 0.0);
        assert!(identity.volts_from_raw(i16::MIN) < -20.0);
        assert!(identity.volts_from_raw(i16::MIN) > -20.01);
    }

    #[test]
    fn capture_extremes() {
        let capture = Capture {
            timestamp: Local::now(),
            samples: vec![0.5, -2.0, 7.25, 1.0],
        };
        assert_eq!(capture.max_voltage(), 7.25);
        assert_eq!(capture.min_voltage(), -2.0);
    }
}
