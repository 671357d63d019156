//! Device enumeration.
//!
//! Each driver family enumerates by opening units until the vendor bindings
//! run out. A unit that opens but cannot report its serial is logged and
//! skipped rather than aborting the whole sweep.

use std::sync::Arc;

use log::{info, warn};
use scope_types::ScopeFamily;

use crate::bindings::ScopeBindings;
use crate::ps2204a::Ps2204a;
use crate::ps2206b::Ps2206b;
use crate::types::ScopeDevice;

/// Opens every attached unit of one family.
pub fn discover_family(
    family: ScopeFamily,
    bindings: &Arc<dyn ScopeBindings>,
) -> Vec<Box<dyn ScopeDevice>> {
    let mut devices: Vec<Box<dyn ScopeDevice>> = Vec::new();
    while let Some(handle) = bindings.open_unit() {
        let opened: Result<Box<dyn ScopeDevice>, _> = match family {
            ScopeFamily::Ps2204a => {
                Ps2204a::open(Arc::clone(bindings), handle).map(|d| Box::new(d) as _)
            }
            ScopeFamily::Ps2206b => {
                Ps2206b::open(Arc::clone(bindings), handle).map(|d| Box::new(d) as _)
            }
        };
        match opened {
            Ok(device) => {
                info!(
                    "discovered {:?} unit, serial {}",
                    family,
                    device.identity().serial_code
                );
                devices.push(device);
            }
            Err(e) => warn!("skipping {family:?} unit: {e}"),
        }
    }
    devices
}

/// Sweeps both families and returns everything found, 2204A units first.
pub fn discover_all(
    a_bindings: &Arc<dyn ScopeBindings>,
    b_bindings: &Arc<dyn ScopeBindings>,
) -> Vec<Box<dyn ScopeDevice>> {
    let mut devices = discover_family(ScopeFamily::Ps2204a, a_bindings);
    devices.extend(discover_family(ScopeFamily::Ps2206b, b_bindings));
    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockScopeBindings;

    #[test]
    fn discovers_every_unit_then_stops() {
        let bindings: Arc<dyn ScopeBindings> =
            Arc::new(MockScopeBindings::new(vec!["A-1".into(), "A-2".into()]));
        let devices = discover_family(ScopeFamily::Ps2204a, &bindings);
        assert_eq!(devices.len(), 2);
        let serials: Vec<_> = devices
            .iter()
            .map(|d| d.identity().serial_code.clone())
            .collect();
        assert_eq!(serials, ["A-1", "A-2"]);
    }

    #[test]
    fn empty_bus_yields_no_devices() {
        let bindings: Arc<dyn ScopeBindings> = Arc::new(MockScopeBindings::new(vec![]));
        assert!(discover_family(ScopeFamily::Ps2206b, &bindings).is_empty());
    }
}
