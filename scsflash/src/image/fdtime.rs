//! Packed DOS-style firmware time stamps.
//!
//! Both the firmware file and the modem's flash carry a 32-bit stamp with the
//! following little-endian bit layout, least significant field first:
//!
//! ```text
//!  31      25 24  21 20  16 15  11 10     5 4    0
//! +----------+------+------+------+--------+------+
//! |   year   |month | day  | hour | minute | 2sec |
//! +----------+------+------+------+--------+------+
//! ```
//!
//! The year is an offset from 1980. Because the most significant fields come
//! last, comparing raw values orders stamps chronologically.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Year that a zero year field stands for.
pub const BASE_YEAR: i32 = 1980;

/// Decoded view of a packed firmware time stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FdTime {
    raw: u32,
}

impl FdTime {
    /// Wrap a raw stamp as read from the wire or a file.
    pub const fn from_raw(raw: u32) -> Self {
        Self { raw }
    }

    /// Packed value.
    pub const fn raw(self) -> u32 {
        self.raw
    }

    /// Pack the individual fields. Out-of-range values are truncated to their
    /// field width.
    pub const fn from_fields(
        year_offset: u8,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        two_seconds: u8,
    ) -> Self {
        let raw = (two_seconds as u32 & 0x1F)
            | ((minute as u32 & 0x3F) << 5)
            | ((hour as u32 & 0x1F) << 11)
            | ((day as u32 & 0x1F) << 16)
            | ((month as u32 & 0x0F) << 21)
            | ((year_offset as u32 & 0x7F) << 25);
        Self { raw }
    }

    /// Seconds divided by two (0..=29 for valid stamps).
    pub const fn two_seconds(self) -> u8 {
        (self.raw & 0x1F) as u8
    }

    /// Minute field.
    pub const fn minute(self) -> u8 {
        ((self.raw >> 5) & 0x3F) as u8
    }

    /// Hour field.
    pub const fn hour(self) -> u8 {
        ((self.raw >> 11) & 0x1F) as u8
    }

    /// Day-of-month field.
    pub const fn day(self) -> u8 {
        ((self.raw >> 16) & 0x1F) as u8
    }

    /// Month field.
    pub const fn month(self) -> u8 {
        ((self.raw >> 21) & 0x0F) as u8
    }

    /// Year as an offset from 1980.
    pub const fn year_offset(self) -> u8 {
        ((self.raw >> 25) & 0x7F) as u8
    }

    /// Calendar year.
    pub const fn year(self) -> i32 {
        BASE_YEAR + self.year_offset() as i32
    }

    /// Whether the stamp is blank or the erased-flash pattern.
    ///
    /// A zero day or month means no stamp was ever written. Day 31, month 15
    /// and year offset 127 together are what erased flash reads back as.
    pub const fn is_unset(self) -> bool {
        let (day, month, year) = (self.day(), self.month(), self.year_offset());
        day == 0 || month == 0 || (day == 0x1F && month == 0x0F && year == 0x7F)
    }

    /// Convert to a calendar date and time, if the fields form a valid one.
    pub fn to_datetime(self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year(), u32::from(self.month()), u32::from(self.day()))?
            .and_hms_opt(
                u32::from(self.hour()),
                u32::from(self.minute()),
                u32::from(self.two_seconds()) * 2,
            )
    }

    /// Build a stamp from a calendar date and time.
    ///
    /// Returns `None` for years outside 1980..=2107. Odd seconds are rounded
    /// down.
    pub fn from_datetime(dt: &NaiveDateTime) -> Option<Self> {
        let offset = u8::try_from(dt.year() - BASE_YEAR).ok()?;
        if offset > 0x7F {
            return None;
        }
        Some(Self::from_fields(
            offset,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            (dt.second() / 2) as u8,
        ))
    }
}

impl fmt::Display for FdTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.minute(),
            u32::from(self.two_seconds()) * 2
        )
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for FdTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_decoding() {
        // 2023-06-15 14:30:20
        let stamp = FdTime::from_fields(43, 6, 15, 14, 30, 10);
        assert_eq!(stamp.year(), 2023);
        assert_eq!(stamp.month(), 6);
        assert_eq!(stamp.day(), 15);
        assert_eq!(stamp.hour(), 14);
        assert_eq!(stamp.minute(), 30);
        assert_eq!(stamp.two_seconds(), 10);
        assert_eq!(stamp.to_string(), "2023-06-15 14:30:20");
    }

    #[test]
    fn test_bit_positions() {
        assert_eq!(FdTime::from_raw(0x0000_001F).two_seconds(), 31);
        assert_eq!(FdTime::from_raw(0x0000_07E0).minute(), 63);
        assert_eq!(FdTime::from_raw(0x0000_F800).hour(), 31);
        assert_eq!(FdTime::from_raw(0x001F_0000).day(), 31);
        assert_eq!(FdTime::from_raw(0x01E0_0000).month(), 15);
        assert_eq!(FdTime::from_raw(0xFE00_0000).year_offset(), 127);
    }

    #[test]
    fn test_unset_detection() {
        assert!(FdTime::from_raw(0).is_unset());
        assert!(FdTime::from_fields(40, 0, 1, 0, 0, 0).is_unset());
        assert!(FdTime::from_fields(40, 1, 0, 0, 0, 0).is_unset());
        assert!(FdTime::from_raw(0xFFFF_FFFF).is_unset());
        assert!(FdTime::from_fields(0x7F, 0x0F, 0x1F, 0, 0, 0).is_unset());

        assert!(!FdTime::from_fields(40, 1, 1, 0, 0, 0).is_unset());
        assert!(!FdTime::from_fields(0x7F, 0x0F, 0x1E, 0, 0, 0).is_unset());
    }

    #[test]
    fn test_ordering_is_chronological() {
        let older = FdTime::from_fields(40, 12, 31, 23, 59, 29);
        let newer = FdTime::from_fields(41, 1, 1, 0, 0, 0);
        assert!(older < newer);

        let morning = FdTime::from_fields(41, 1, 1, 8, 0, 0);
        assert!(newer < morning);
    }

    #[test]
    fn test_datetime_conversion() {
        let dt = NaiveDate::from_ymd_opt(2021, 3, 7)
            .unwrap()
            .and_hms_opt(9, 41, 33)
            .unwrap();
        let stamp = FdTime::from_datetime(&dt).unwrap();
        assert_eq!(stamp.to_string(), "2021-03-07 09:41:32");

        assert!(FdTime::from_raw(0).to_datetime().is_none());

        let too_old = NaiveDate::from_ymd_opt(1979, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(FdTime::from_datetime(&too_old).is_none());
    }
}
