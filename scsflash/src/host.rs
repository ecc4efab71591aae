//! Host-side entry points for finding a modem.

use crate::device::DetectedPort;

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    crate::device::detect_ports()
}

/// Discover serial ports that belong to SCS modems.
#[must_use]
pub fn discover_scs_modems() -> Vec<DetectedPort> {
    crate::device::detect_scs_ports()
}

/// Auto-detect a single SCS modem.
pub fn auto_detect_modem() -> crate::Result<DetectedPort> {
    crate::device::auto_detect_modem()
}

