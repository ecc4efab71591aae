//! Native serial port implementation using the `serialport` crate.
//!
//! Works on every platform `serialport` supports (Linux, macOS, Windows,
//! FreeBSD). The line is opened 8N1 without flow control, which is what every
//! SCS modem expects.

use {
    crate::{
        error::Result,
        port::{Port, SerialConfig},
    },
    log::{debug, info},
    serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits},
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// Native serial port implementation.
pub struct NativePort {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    timeout: Duration,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        info!(
            "Opening serial device {} at {} baud",
            config.port_name, config.baud_rate
        );

        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;

        debug!("Serial device {} opened", config.port_name);

        Ok(Self {
            port,
            name: config
                .port_name
                .clone(),
            timeout: config.timeout,
        })
    }

    /// Open a serial port with default settings.
    pub fn open_simple(port_name: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig::new(port_name, baud_rate);
        Self::open(&config)
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port
            .set_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.port
            .clear(ClearBuffer::All)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .flush()
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        info!("Serial device {} closed", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_fails() {
        let config = SerialConfig::new("/dev/scsflash-does-not-exist", 115200);
        assert!(NativePort::open(&config).is_err());
    }
}
