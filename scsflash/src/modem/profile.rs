//! Registry of supported SCS modem types.
//!
//! A modem identifies itself with a one-letter version code in its `ver ##`
//! response. The code decides which firmware files it accepts and which
//! header layout those files use.

use crate::error::{Error, Result};
use crate::image::FormatKind;

/// Static description of one modem type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ModemProfile {
    /// Letter reported by `ver ##`.
    pub version_code: char,
    /// Marketing name.
    pub name: &'static str,
    /// Extension of matching firmware files, without the dot.
    pub extension: &'static str,
    /// Header layout of matching firmware files.
    pub format: FormatKind,
    /// Whether the modem keeps a host-mode log.
    pub host_mode_log: bool,
}

const fn pt(version_code: char, name: &'static str, extension: &'static str) -> ModemProfile {
    ModemProfile {
        version_code,
        name,
        extension,
        format: FormatKind::Pt,
        host_mode_log: false,
    }
}

const fn dragon(version_code: char, name: &'static str) -> ModemProfile {
    ModemProfile {
        version_code,
        name,
        extension: "dr7",
        format: FormatKind::P4,
        host_mode_log: true,
    }
}

/// Every modem type known to the updater.
pub static MODEM_PROFILES: &[ModemProfile] = &[
    pt('A', "PTC-II", "pt2"),
    pt('B', "PTC-IIpro", "pro"),
    pt('C', "PTC-IIe", "pte"),
    pt('D', "PTC-IIex", "pex"),
    pt('E', "PTC-IIusb", "ptu"),
    pt('F', "PTC-IInet", "ptn"),
    dragon('H', "DR-7800"),
    dragon('I', "DR-7400"),
    dragon('K', "DR-7000"),
    pt('L', "PTC-IIIusb", "p3u"),
    pt('T', "PTC-IItrx", "ptx"),
];

impl ModemProfile {
    /// Look up a profile by version code.
    pub fn lookup(version_code: char) -> Option<&'static Self> {
        MODEM_PROFILES
            .iter()
            .find(|p| p.version_code == version_code)
    }

    /// Like [`ModemProfile::lookup`], failing with [`Error::UnknownModem`].
    pub fn find(version_code: char) -> Result<&'static Self> {
        Self::lookup(version_code).ok_or(Error::UnknownModem(version_code))
    }

    /// Look up the first profile whose firmware uses `extension`.
    ///
    /// Several P4dragon models share `dr7`; they all use the same format, so
    /// the first match is good enough to pick the header layout.
    pub fn for_extension(extension: &str) -> Option<&'static Self> {
        MODEM_PROFILES
            .iter()
            .find(|p| p.extension.eq_ignore_ascii_case(extension))
    }
}
