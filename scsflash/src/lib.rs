//! # scsflash
//!
//! A library for updating the firmware of SCS PTC and P4dragon modems.
//!
//! This crate provides the core functionality for talking to an SCS modem
//! over its serial port, including:
//!
//! - Firmware image validation (PT and P4 header layouts, CRC-32)
//! - The `UPDATE` chunk transfer protocol
//! - Modem type detection and other `cmd:` prompt requests
//! - USB discovery of attached modems
//!
//! ## Supported Modems
//!
//! PTC-II, PTC-IIpro, PTC-IIe, PTC-IIex, PTC-IIusb, PTC-IInet, PTC-IItrx,
//! PTC-IIIusb and the P4dragon DR-7000/7400/7800. See [`MODEM_PROFILES`].
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use scsflash::{ModemCommands, NativePort, Updater};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut port = NativePort::open_simple("/dev/ttyUSB0", 115200)?;
//!
//!     // Find out which modem is attached
//!     let profile = {
//!         let mut modem = ModemCommands::new(&mut port);
//!         modem.wake()?;
//!         modem.query_version()?
//!     };
//!
//!     // Send the firmware
//!     let mut updater = Updater::new(&mut port);
//!     updater.update_file(profile, Path::new("ptc3.p3u"), |event| {
//!         println!("{event:?}");
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod host;
pub mod image;
pub mod modem;
pub mod port;
pub mod protocol;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    device::{DetectedPort, ScsModel},
    error::{Error, Result},
    host::{auto_detect_modem, discover_ports, discover_scs_modems},
    image::{FdTime, FirmwareImage, FormatKind, ImageInfo},
    modem::{MODEM_PROFILES, ModemCommands, ModemProfile, commands::ModemInfo},
    port::{Port, SerialConfig},
    protocol::{
        CancelToken, TransferConfig, TransferEvent, TransferSession, TransferState, Updater,
    },
};
