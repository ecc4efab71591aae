//! Error types for scsflash.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for scsflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for scsflash operations.
///
/// Every variant is terminal for the current update attempt. Nothing is
/// retried internally; callers may start the whole operation again.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The firmware file could not be opened.
    #[error("Cannot open firmware file {}: {source}", path.display())]
    FileOpen {
        /// Path that was passed in.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// The firmware file name has no extension.
    #[error("Update file has no extension")]
    MissingExtension,

    /// The firmware file extension does not match the modem type.
    #[error("File extension .{found} does not match modem type (expected .{expected})")]
    ExtensionMismatch {
        /// Extension of the given file.
        found: String,
        /// Extension required by the modem profile.
        expected: &'static str,
    },

    /// The image does not start with the expected header ID.
    #[error("Wrong header ID: expected {expected:#06X}, got {found:#06X}")]
    HeaderMismatch {
        /// Header ID of the selected format.
        expected: u16,
        /// Header ID found in the file.
        found: u16,
    },

    /// CRC checksum mismatch.
    #[error("Firmware CRC check failed: expected {expected:#010X}, got {actual:#010X}")]
    CrcMismatch {
        /// CRC stored in the image.
        expected: u32,
        /// CRC computed over the image.
        actual: u32,
    },

    /// A PT image has nonzero data after its CRC.
    #[error("Wrong data after CRC: {0:#06X}")]
    TrailingDataInvalid(u16),

    /// The image ends before the fields its header announces.
    #[error("Firmware file is truncated")]
    TruncatedImage,

    /// The image has no bytes to transfer.
    #[error("Firmware file is empty")]
    EmptyImage,

    /// The image needs more chunks than the protocol can announce.
    #[error("Firmware file too large: {chunks} chunks exceed the 16-bit chunk counter")]
    ImageTooLarge {
        /// Number of chunks the file would need.
        chunks: u64,
    },

    /// No data arrived from the modem within the read timeout.
    #[error("Timeout waiting for {waiting_for}")]
    ChannelTimeout {
        /// What the protocol was waiting for.
        waiting_for: &'static str,
    },

    /// The modem reported a flash ID that is not supported.
    #[error("Unexpected flash ID {0:#06X}")]
    UnexpectedFlashId(u16),

    /// The modem did not acknowledge the chunk count.
    #[error("Handshake failed: received {0:#04X}")]
    HandshakeFailed(u8),

    /// The modem did not acknowledge a chunk.
    #[error("Handshake failed at chunk {chunk}: received {byte:#04X}")]
    ChunkHandshakeFailed {
        /// Byte received instead of ACK.
        byte: u8,
        /// Zero-based index of the rejected chunk.
        chunk: u32,
    },

    /// The installed firmware is as new as or newer than the file.
    #[error("Installed firmware ({flash}) is the same age or newer than the file ({file})")]
    FirmwareNotNewer {
        /// Time stamp of the file.
        file: String,
        /// Time stamp of the installed firmware.
        flash: String,
    },

    /// The update was cancelled.
    #[error("Update cancelled")]
    Cancelled,

    /// The modem reported a version code missing from the profile table.
    #[error("Unknown modem type: {0:?}")]
    UnknownModem(char),

    /// No SCS modem was found.
    #[error("No SCS modem found")]
    DeviceNotFound,
}

impl Error {
    /// Returns `true` when the error came from a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` for errors detected while validating the image file,
    /// before anything was sent to the modem.
    pub fn is_image_error(&self) -> bool {
        matches!(
            self,
            Self::FileOpen { .. }
                | Self::MissingExtension
                | Self::ExtensionMismatch { .. }
                | Self::HeaderMismatch { .. }
                | Self::CrcMismatch { .. }
                | Self::TrailingDataInvalid(_)
                | Self::TruncatedImage
                | Self::EmptyImage
        )
    }
}
