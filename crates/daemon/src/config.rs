//! Configuration file loader.
//!
//! The format is line-oriented: `Key: value`, split on the first colon, keys
//! case-insensitive. The first line must be `Version: 5`; anything else is a
//! file from an incompatible deployment and is rejected outright. A malformed
//! booth definition is logged and skipped so one bad line cannot take down
//! every other booth.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use scope_types::{BoothDefinition, SystemConfig, TriggerConfig, TriggerEdge};
use thiserror::Error;
use tracing::warn;

pub const SUPPORTED_VERSION: &str = "5";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file is empty or missing a Version line")]
    MissingVersion,
    #[error("unsupported config version {0:?} (expected {SUPPORTED_VERSION})")]
    UnsupportedVersion(String),
}

pub fn load(path: &Path) -> Result<SystemConfig, ConfigError> {
    parse(&std::fs::read_to_string(path)?)
}

pub fn parse(contents: &str) -> Result<SystemConfig, ConfigError> {
    let mut lines = contents.lines().filter(|l| !l.trim().is_empty());

    let (first_key, first_value) = lines
        .next()
        .and_then(split_key_value)
        .ok_or(ConfigError::MissingVersion)?;
    if !first_key.eq_ignore_ascii_case("Version") {
        return Err(ConfigError::MissingVersion);
    }
    if first_value != SUPPORTED_VERSION {
        return Err(ConfigError::UnsupportedVersion(first_value.to_string()));
    }

    let mut config = SystemConfig::default();
    for line in lines {
        let Some((key, value)) = split_key_value(line) else {
            continue;
        };
        if key.eq_ignore_ascii_case("Booth Definition") {
            match parse_booth_definition(value) {
                Some(booth) => config.booths.push(booth),
                None => warn!("skipping malformed booth definition: {value:?}"),
            }
        } else if key.eq_ignore_ascii_case("Primary Path") {
            config.primary_path = non_empty_path(value);
        } else if key.eq_ignore_ascii_case("Secondary Path") {
            config.secondary_path = non_empty_path(value);
        } else if key.eq_ignore_ascii_case("Group ID") {
            config.group_id = (!value.is_empty()).then(|| value.to_string());
        } else if key.eq_ignore_ascii_case("Enable Passive Collection") {
            config.passive_collection_enabled = value.eq_ignore_ascii_case("true");
        }
    }
    Ok(config)
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    Some((key.trim(), value.trim()))
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    (!value.is_empty()).then(|| PathBuf::from(value))
}

/// Ten comma-separated fields: serial, booth number, pre-trigger,
/// post-trigger, sample interval, trigger voltage, trigger edge, refractory
/// period, session display, trace display. Durations carry a unit suffix.
fn parse_booth_definition(value: &str) -> Option<BoothDefinition> {
    let fields: Vec<&str> = value.split(',').map(str::trim).collect();
    if fields.len() < 10 {
        return None;
    }

    Some(BoothDefinition {
        serial_code: fields[0].to_string(),
        booth_number: fields[1].parse().ok()?,
        trigger: TriggerConfig {
            pre_trigger_us: parse_duration_us(fields[2])?,
            post_trigger_us: parse_duration_us(fields[3])?,
            desired_sample_interval_us: parse_duration_us(fields[4])?,
            trigger_voltage: fields[5].parse().ok()?,
            trigger_edge: TriggerEdge::from_str(fields[6]).ok()?,
            refractory_us: parse_duration_us(fields[7])?,
        },
        session_display: fields[8].to_string(),
        trace_display: fields[9].to_string(),
    })
}

/// Parses `"<number> <unit>"` into microseconds. Units are s, ms, us and ns;
/// nanoseconds divide down with truncation.
fn parse_duration_us(value: &str) -> Option<i64> {
    let mut parts = value.split_whitespace();
    let number: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if unit.eq_ignore_ascii_case("s") {
        Some(number * 1_000_000)
    } else if unit.eq_ignore_ascii_case("ms") {
        Some(number * 1000)
    } else if unit.eq_ignore_ascii_case("us") {
        Some(number)
    } else if unit.eq_ignore_ascii_case("ns") {
        Some(number / 1000)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Version: 5
Primary Path: /data/primary
Secondary Path: /data/secondary
Group ID: G2
Enable Passive Collection: True
Booth Definition: DU009/008, 3, -100 us, 500 ms, 1 us, 1.5, FallingEdge, 10 s, Session, Trace
Booth Definition: EW413/021, 4, 0 us, 15 ms, 1000 ns, 2.0, RisingEdge, 0 us, Session, Trace
";

    #[test]
    fn parses_complete_file() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.primary_path, Some(PathBuf::from("/data/primary")));
        assert_eq!(config.secondary_path, Some(PathBuf::from("/data/secondary")));
        assert_eq!(config.group_id.as_deref(), Some("G2"));
        assert!(config.passive_collection_enabled);
        assert_eq!(config.booths.len(), 2);

        let booth = &config.booths[0];
        assert_eq!(booth.serial_code, "DU009/008");
        assert_eq!(booth.booth_number, 3);
        assert_eq!(booth.trigger.pre_trigger_us, -100);
        assert_eq!(booth.trigger.post_trigger_us, 500_000);
        assert_eq!(booth.trigger.trigger_voltage, 1.5);
        assert_eq!(booth.trigger.trigger_edge, TriggerEdge::Falling);
        assert_eq!(booth.trigger.refractory_us, 10_000_000);

        assert_eq!(config.booths[1].trigger.desired_sample_interval_us, 1);
        assert_eq!(config.booths[1].trigger.trigger_edge, TriggerEdge::Rising);
    }

    #[test]
    fn rejects_wrong_version() {
        assert!(matches!(
            parse("Version: 4\n"),
            Err(ConfigError::UnsupportedVersion(v)) if v == "4"
        ));
        assert!(matches!(parse(""), Err(ConfigError::MissingVersion)));
        assert!(matches!(
            parse("Primary Path: /x\n"),
            Err(ConfigError::MissingVersion)
        ));
    }

    #[test]
    fn malformed_booth_line_is_skipped() {
        let config = parse(
            "Version: 5\nBooth Definition: SER, not_a_number, 0 us, 1 ms, 1 us, 1.0, Rising, 0 us, A, B\n",
        )
        .unwrap();
        assert!(config.booths.is_empty());
    }

    #[test]
    fn duration_units_convert_to_microseconds() {
        assert_eq!(parse_duration_us("2 s"), Some(2_000_000));
        assert_eq!(parse_duration_us("15 ms"), Some(15_000));
        assert_eq!(parse_duration_us("-100 us"), Some(-100));
        // Nanoseconds truncate toward zero.
        assert_eq!(parse_duration_us("1500 ns"), Some(1));
        assert_eq!(parse_duration_us("999 ns"), Some(0));
        assert_eq!(parse_duration_us("10 fortnights"), None);
        assert_eq!(parse_duration_us("10"), None);
    }

    #[test]
    fn empty_paths_remain_unset() {
        let config = parse("Version: 5\nPrimary Path:\nGroup ID:\n").unwrap();
        assert_eq!(config.primary_path, None);
        assert_eq!(config.group_id, None);
    }
}
