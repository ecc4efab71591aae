//! Discovery of SCS modems attached over USB.
//!
//! Every USB modem from SCS uses an FTDI bridge with vendor ID `0x0403` and a
//! product ID from `0xD010..=0xD017`. The low three bits of the product ID
//! identify the model, which also fixes the serial speed the modem runs at.

use log::info;
#[cfg(feature = "native")]
use log::{debug, trace};

use crate::error::{Error, Result};

/// USB vendor ID of the FTDI bridge used by SCS.
pub const SCS_VID: u16 = 0x0403;

/// Product ID of the first SCS model; the next seven IDs are reserved for SCS.
pub const SCS_PID_BASE: u16 = 0xD010;

const SCS_PID_MASK: u16 = 0xFFF8;

/// Modem models that can be recognised from the USB product ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ScsModel {
    /// PTC-IIusb.
    PtcIIusb,
    /// Tracker or DSP TNC.
    TrackerDspTnc,
    /// P4dragon DR-7800.
    Dr7800,
    /// P4dragon DR-7400.
    Dr7400,
    /// PTC-IIIusb.
    PtcIIIusb,
}

impl ScsModel {
    /// Classify a USB VID/PID pair. Returns `None` for anything that is not
    /// a known SCS modem.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Option<Self> {
        if vid != SCS_VID || pid & SCS_PID_MASK != SCS_PID_BASE {
            return None;
        }
        match pid & 0x07 {
            0 => Some(Self::PtcIIusb),
            1 => Some(Self::TrackerDspTnc),
            2 => Some(Self::Dr7800),
            3 => Some(Self::Dr7400),
            5 => Some(Self::PtcIIIusb),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PtcIIusb => "PTC-IIusb",
            Self::TrackerDspTnc => "Tracker / DSP TNC",
            Self::Dr7800 => "P4dragon DR-7800",
            Self::Dr7400 => "P4dragon DR-7400",
            Self::PtcIIIusb => "PTC-IIIusb",
        }
    }

    /// Serial speed the modem expects.
    pub fn default_baud(&self) -> u32 {
        match self {
            Self::PtcIIusb | Self::PtcIIIusb => 115_200,
            Self::TrackerDspTnc => 38_400,
            Self::Dr7800 | Self::Dr7400 => 829_440,
        }
    }
}

/// A serial port found on the host.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// SCS model, when the USB IDs identify one.
    pub model: Option<ScsModel>,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Whether this port belongs to an SCS modem.
    pub fn is_scs_modem(&self) -> bool {
        self.model
            .is_some()
    }

    /// Serial speed to use for this port, if the model is known.
    pub fn default_baud(&self) -> Option<u32> {
        self.model
            .map(|m| m.default_baud())
    }
}

/// List every serial port on the host.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort {
                    name: port_info
                        .port_name
                        .clone(),
                    model: None,
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                    serial: None,
                };

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.model = ScsModel::from_vid_pid(usb_info.vid, usb_info.pid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Model: {:?})",
                        port_info.port_name, usb_info.vid, usb_info.pid, detected.model
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// List every serial port on the host (always empty without `native`).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// List the ports that belong to SCS modems.
pub fn detect_scs_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_scs_modem)
        .collect()
}

/// Pick the SCS modem to talk to.
///
/// With several modems attached the first one is used; callers that want to
/// let the user choose should look at [`detect_scs_ports`] instead.
pub fn auto_detect_modem() -> Result<DetectedPort> {
    first_modem(detect_scs_ports())
}

fn first_modem(mut ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    if ports.len() > 1 {
        info!(
            "{} SCS modems found, using the first one",
            ports.len()
        );
    }

    if ports.is_empty() {
        return Err(Error::DeviceNotFound);
    }
    let port = ports.swap_remove(0);
    if let Some(model) = port.model {
        info!("Auto-detected {}: {}", model.name(), port.name);
    }
    Ok(port)
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    let mut result = Vec::new();

    for port in ports {
        let device_info = if let Some(model) = port.model {
            format!(" [{}, {} baud]", model.name(), model.default_baud())
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let serial_info = port
            .serial
            .as_ref()
            .map(|s| format!(" - S/N {s}"))
            .unwrap_or_default();

        result.push(format!("{}{}{}", port.name, device_info, serial_info));
    }

    result
}
