//! CRC-32 used to validate firmware images.
//!
//! Standard reflected CRC-32 (the zip/Ethernet variant): polynomial
//! `0xEDB88320`, register preset to all ones and inverted at the end.
//! The lookup table is built at compile time.

/// Reflected CRC-32 polynomial.
pub const CRCPOLY: u32 = 0xEDB8_8320;

/// Initial register value and final XOR mask.
pub const CRC_MASK: u32 = 0xFFFF_FFFF;

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRCPOLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_table();

/// Incremental CRC-32 calculator.
///
/// ```
/// use scsflash::protocol::crc::{Crc32, crc32};
///
/// let mut crc = Crc32::new();
/// crc.update(b"1234");
/// crc.update(b"56789");
/// assert_eq!(crc.finalize(), crc32(b"123456789"));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    register: u32,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    /// Start a new computation.
    pub const fn new() -> Self {
        Self {
            register: CRC_MASK,
        }
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let index = ((self.register ^ u32::from(byte)) & 0xFF) as usize;
            self.register = CRC_TABLE[index] ^ (self.register >> 8);
        }
    }

    /// Value of the checksum over everything fed so far.
    pub const fn finalize(self) -> u32 {
        self.register ^ CRC_MASK
    }
}

/// Compute the CRC-32 of `data` in one go.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(data);
    crc.finalize()
}
