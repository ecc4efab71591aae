//! Firmware image formats.

pub mod fdtime;
pub mod firmware;

pub use fdtime::FdTime;
pub use firmware::{FirmwareImage, FormatKind, ImageInfo};
