//! Port abstraction for the serial link to the modem.
//!
//! The transfer engine and the auxiliary modem commands only need a blocking
//! byte stream with a per-read timeout. This module provides the `Port` trait
//! for that, so the protocol layer stays independent of the actual serial
//! implementation:
//!
//! ```text
//! +-----------------------------+
//! |  Protocol Layer             |
//! |  (transfer, modem commands) |
//! +--------------+--------------+
//!                |
//!                v
//! +--------------+--------------+
//! |  Port Trait                 |
//! +--------------+--------------+
//!                |
//!                v
//! +--------------+--------------+
//! |  NativePort (serialport)    |
//! +-----------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use scsflash::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> scsflash::Result<()> {
//!     port.write_all_bytes(b"ver ##\r")?;
//!
//!     let mut buf = [0u8; 32];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default per-read timeout on the modem link.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial port configuration.
///
/// SCS modems always run 8 data bits, no parity, one stop bit and no flow
/// control, so only the path, speed and read timeout are configurable.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout. A read that sees no data for this long fails.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Blocking, timeout-capable byte channel to the modem.
///
/// A read returns `ErrorKind::TimedOut` (or `Ok(0)`) when the line stayed
/// idle for the configured timeout.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Discard anything buffered by the driver in both directions.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.port_name.is_empty());
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 829440).with_timeout(Duration::from_secs(2));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 829440);
        assert_eq!(config.timeout, Duration::from_secs(2));
    }
}
