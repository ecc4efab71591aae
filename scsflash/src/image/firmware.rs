//! SCS firmware image validation.
//!
//! Two header layouts exist. The format is chosen from the modem profile; the
//! header ID only confirms it. All fields are little-endian.
//!
//! ## PT (PTC family)
//!
//! ```text
//! offset  0: u16 header ID (0xEA60)
//! offset  2: u16 size
//! offset  4: size bytes covered by the CRC
//!            u32 CRC-32
//!            u16 zero
//! ```
//!
//! ## P4 (P4dragon family)
//!
//! ```text
//! offset  0: u16 header ID (0x3450)
//! offset  2: u16 part count (unused)
//! offset  4: u32 size
//! offset  0: size bytes covered by the CRC (including this header)
//!            u32 CRC-32
//! ```
//!
//! Both layouts carry the build time stamp at offset 12.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, error};

use crate::error::{Error, Result};
use crate::image::fdtime::FdTime;
use crate::protocol::crc::Crc32;
use crate::protocol::transfer::CHUNK_SIZE;

/// Offset of the build time stamp in both layouts.
pub const TIME_STAMP_OFFSET: u64 = 12;

/// Firmware header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FormatKind {
    /// PTC-II/PTC-III family.
    #[cfg_attr(feature = "serde", serde(rename = "PT"))]
    Pt,
    /// P4dragon family.
    #[cfg_attr(feature = "serde", serde(rename = "P4"))]
    P4,
}

impl FormatKind {
    /// Magic value in the first two bytes.
    pub const fn header_id(self) -> u16 {
        match self {
            Self::Pt => 0xEA60,
            Self::P4 => 0x3450,
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pt => write!(f, "PT"),
            Self::P4 => write!(f, "P4"),
        }
    }
}

/// Summary of a validated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ImageInfo {
    /// Header layout.
    pub format: FormatKind,
    /// Size field from the header.
    pub declared_size: u32,
    /// CRC stored in the file (and verified).
    pub crc: u32,
    /// Build time stamp.
    pub time_stamp: FdTime,
    /// Length of the whole file in bytes.
    pub file_len: u64,
    /// Number of 256-byte chunks a transfer sends.
    pub chunks: u64,
}

/// A firmware image whose header and checksum have been verified.
///
/// The image owns its byte source. Dropping it closes the file.
pub struct FirmwareImage<R = BufReader<File>> {
    format: FormatKind,
    declared_size: u32,
    crc: u32,
    time_stamp: FdTime,
    file_len: u64,
    source: R,
}

impl FirmwareImage {
    /// Open and validate an image file.
    pub fn open<P: AsRef<Path>>(path: P, format: FormatKind) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Validating {} as {format} image", path.display());
        Self::from_reader(BufReader::new(file), format)
    }
}

impl<R: Read + Seek> FirmwareImage<R> {
    /// Validate an image from any seekable source.
    pub fn from_reader(mut source: R, format: FormatKind) -> Result<Self> {
        let file_len = source.seek(SeekFrom::End(0))?;
        if file_len == 0 {
            return Err(Error::EmptyImage);
        }
        source.seek(SeekFrom::Start(0))?;

        let found = source
            .read_u16::<LittleEndian>()
            .map_err(truncated)?;
        if found != format.header_id() {
            return Err(Error::HeaderMismatch {
                expected: format.header_id(),
                found,
            });
        }

        let (declared_size, crc) = match format {
            FormatKind::Pt => check_pt(&mut source)?,
            FormatKind::P4 => check_p4(&mut source)?,
        };

        source.seek(SeekFrom::Start(TIME_STAMP_OFFSET))?;
        let time_stamp = FdTime::from_raw(
            source
                .read_u32::<LittleEndian>()
                .map_err(truncated)?,
        );
        source.seek(SeekFrom::Start(0))?;

        debug!(
            "{format} image OK: {file_len} bytes, CRC {crc:#010X}, built {time_stamp}"
        );

        Ok(Self {
            format,
            declared_size,
            crc,
            time_stamp,
            file_len,
            source,
        })
    }

    /// Header layout.
    pub fn format(&self) -> FormatKind {
        self.format
    }

    /// Size field from the header.
    pub fn declared_size(&self) -> u32 {
        self.declared_size
    }

    /// Verified CRC.
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Build time stamp.
    pub fn time_stamp(&self) -> FdTime {
        self.time_stamp
    }

    /// Length of the whole file.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Summary for display.
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            format: self.format,
            declared_size: self.declared_size,
            crc: self.crc,
            time_stamp: self.time_stamp,
            file_len: self.file_len,
            chunks: self
                .file_len
                .div_ceil(CHUNK_SIZE as u64),
        }
    }

    /// Seek back to the first byte of the file.
    pub fn rewind(&mut self) -> Result<()> {
        self.source
            .seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Read until `buf` is full or the file ends. Returns the bytes read.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self
                .source
                .read(&mut buf[filled..])
            {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// Give back the byte source.
    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R> fmt::Debug for FirmwareImage<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareImage")
            .field("format", &self.format)
            .field("declared_size", &self.declared_size)
            .field("crc", &format_args!("{:#010X}", self.crc))
            .field("time_stamp", &self.time_stamp)
            .field("file_len", &self.file_len)
            .finish_non_exhaustive()
    }
}

fn truncated(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::TruncatedImage
    } else {
        Error::Io(e)
    }
}

/// CRC over the next `len` bytes of `source`.
fn crc_of<R: Read>(source: &mut R, len: u64) -> Result<u32> {
    let mut crc = Crc32::new();
    let mut remaining = len;
    let mut buf = [0u8; 4096];
    let mut limited = source.take(len);
    while remaining > 0 {
        let n = match limited.read(&mut buf) {
            Ok(0) => return Err(Error::TruncatedImage),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        crc.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(crc.finalize())
}

fn verify_crc(expected: u32, actual: u32) -> Result<()> {
    if expected != actual {
        error!("Firmware CRC mismatch: file says {expected:#010X}, computed {actual:#010X}");
        return Err(Error::CrcMismatch { expected, actual });
    }
    Ok(())
}

fn check_pt<R: Read + Seek>(source: &mut R) -> Result<(u32, u32)> {
    let size = source
        .read_u16::<LittleEndian>()
        .map_err(truncated)?;
    let actual = crc_of(source, u64::from(size))?;
    let expected = source
        .read_u32::<LittleEndian>()
        .map_err(truncated)?;
    verify_crc(expected, actual)?;

    let trailer = source
        .read_u16::<LittleEndian>()
        .map_err(truncated)?;
    if trailer != 0 {
        error!("Nonzero data after CRC: {trailer:#06X}");
        return Err(Error::TrailingDataInvalid(trailer));
    }
    Ok((u32::from(size), actual))
}

fn check_p4<R: Read + Seek>(source: &mut R) -> Result<(u32, u32)> {
    let _parts = source
        .read_u16::<LittleEndian>()
        .map_err(truncated)?;
    let size = source
        .read_u32::<LittleEndian>()
        .map_err(truncated)?;

    source.seek(SeekFrom::Start(0))?;
    let actual = crc_of(source, u64::from(size))?;
    let expected = source
        .read_u32::<LittleEndian>()
        .map_err(truncated)?;
    verify_crc(expected, actual)?;
    Ok((size, actual))
}
