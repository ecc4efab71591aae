//! Offline firmware file inspection.

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use console::style;
use scsflash::{FirmwareImage, FormatKind, ImageInfo, MODEM_PROFILES, ModemProfile};
use serde::Serialize;

use crate::CliError;

/// Header layout selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum FormatArg {
    /// PTC family (header 0xEA60).
    Pt,
    /// P4dragon family (header 0x3450).
    P4,
}

impl From<FormatArg> for FormatKind {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Pt => Self::Pt,
            FormatArg::P4 => Self::P4,
        }
    }
}

#[derive(Debug, Serialize)]
struct InfoReport<'a> {
    path: String,
    #[serde(flatten)]
    image: ImageInfo,
    crc_valid: bool,
    modems: Vec<&'a str>,
}

/// Pick the header layout from `--format` or the file extension.
fn resolve_format(path: &Path, format: Option<FormatArg>) -> Result<FormatKind> {
    if let Some(format) = format {
        return Ok(format.into());
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| ext.get(..3))
        .and_then(ModemProfile::for_extension)
        .map(|profile| profile.format)
        .ok_or_else(|| {
            CliError::Usage(format!(
                "Cannot tell the format of {} from its extension; use --format pt|p4",
                path.display()
            ))
            .into()
        })
}

/// Modems whose firmware files carry `path`'s extension.
fn matching_modems(path: &Path) -> Vec<&'static str> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| ext.get(..3))
        .unwrap_or_default();
    MODEM_PROFILES
        .iter()
        .filter(|p| p.extension.eq_ignore_ascii_case(ext))
        .map(|p| p.name)
        .collect()
}

/// Info command implementation.
pub(crate) fn cmd_info(path: &Path, format: Option<FormatArg>, json: bool) -> Result<()> {
    let kind = resolve_format(path, format)?;
    let image = FirmwareImage::open(path, kind)
        .with_context(|| format!("Invalid firmware file {}", path.display()))?;
    let info = image.info();
    drop(image);
    let modems = matching_modems(path);

    if json {
        let report = InfoReport {
            path: path
                .display()
                .to_string(),
            image: info,
            crc_valid: true,
            modems,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", style("Firmware Information").bold().underlined());
    println!("  File:        {}", path.display());
    println!("  Format:      {} (header {:#06X})", info.format, info.format.header_id());
    println!("  Size field:  {}", info.declared_size);
    println!("  File length: {} bytes ({} blocks)", info.file_len, info.chunks);
    println!("  CRC-32:      {:08X} ({})", info.crc, style("valid").green());
    if info.time_stamp.is_unset() {
        println!("  Built:       {}", style("no time stamp").yellow());
    } else {
        println!("  Built:       {}", info.time_stamp);
    }
    if !modems.is_empty() {
        println!("  Modems:      {}", modems.join(", "));
    }
    Ok(())
}
