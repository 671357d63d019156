//! Sampling-rate tables: maps a desired sample interval to the nearest legal
//! one and its device timebase code.
//!
//! The tie-break (first minimal candidate in ascending enumeration order)
//! must never change: acquisition timing and replay compatibility of the
//! persisted files both depend on it.

use scope_types::{ResolvedTiming, ScopeFamily, TriggerConfig};

use crate::types::ScopeError;

/// Number of block-mode timebase codes the 2204A family exposes.
const PS2204A_TIMEBASE_COUNT: u32 = 25;
/// Upper bound on 2206B timebase codes (the SDK takes a signed 16-bit code).
const PS2206B_TIMEBASE_COUNT: i64 = 32_767;

/// Returns the legal sample interval nearest to `desired_ns`, together with
/// the timebase code that selects it.
pub fn nearest_legal_interval(family: ScopeFamily, desired_ns: i64) -> (i64, u32) {
    match family {
        ScopeFamily::Ps2204a => nearest_2204a(desired_ns),
        ScopeFamily::Ps2206b => nearest_2206b(desired_ns),
    }
}

/// Derives concrete timing for one family from a trigger config. Each side of
/// the capture window is quantized independently with truncating division.
pub fn resolve(family: ScopeFamily, trigger: &TriggerConfig) -> Result<ResolvedTiming, ScopeError> {
    trigger.validate()?;
    let desired_ns = trigger.desired_sample_interval_us * 1000;
    let (sample_interval_ns, timebase_code) = nearest_legal_interval(family, desired_ns);
    Ok(ResolvedTiming {
        sample_interval_ns,
        timebase_code,
        pre_samples: trigger.pre_trigger_us * 1000 / sample_interval_ns,
        post_samples: trigger.post_trigger_us * 1000 / sample_interval_ns,
    })
}

/// 2204A legal intervals are `10 * 2^code` ns for codes 0..25.
fn nearest_2204a(desired_ns: i64) -> (i64, u32) {
    let mut best_ns = 10i64;
    let mut best_diff = (best_ns - desired_ns).abs();
    for code in 1..PS2204A_TIMEBASE_COUNT {
        let ns = 10i64 << code;
        let diff = (ns - desired_ns).abs();
        if diff < best_diff {
            best_ns = ns;
            best_diff = diff;
        }
    }
    (best_ns, timebase_2204a(best_ns))
}

fn timebase_2204a(interval_ns: i64) -> u32 {
    (interval_ns / 10).trailing_zeros()
}

/// 2206B intervals follow a two-regime formula: 2, 4, 8 ns for the first
/// three codes, then multiples of 16 ns.
fn interval_2206b(index: i64) -> i64 {
    if index < 3 {
        2i64 << index
    } else {
        (index - 2) * 16
    }
}

fn nearest_2206b(desired_ns: i64) -> (i64, u32) {
    let mut best_ns = interval_2206b(0);
    let mut best_diff = (best_ns - desired_ns).abs();
    for index in 1..PS2206B_TIMEBASE_COUNT {
        let ns = interval_2206b(index);
        let diff = (ns - desired_ns).abs();
        if diff < best_diff {
            best_ns = ns;
            best_diff = diff;
        } else if ns > desired_ns {
            // Intervals grow monotonically; everything later is worse, and a
            // tie must resolve to the earlier candidate.
            break;
        }
    }
    (best_ns, timebase_2206b(best_ns))
}

fn timebase_2206b(interval_ns: i64) -> u32 {
    match interval_ns {
        2 => 0,
        4 => 1,
        8 => 2,
        ns => (ns / 16 + 2) as u32,
    }
}
