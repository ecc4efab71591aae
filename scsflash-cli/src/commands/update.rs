//! Firmware update command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::warn;
use scsflash::{ModemCommands, TransferConfig, TransferEvent, Updater};

use crate::config::Config;
use crate::serial::{SerialOptions, open_port, select_modem_port};
use crate::{Cli, CliError, cancel_token, use_fancy_output};

/// Where to send the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpdateTarget {
    /// Explicit serial device and speed, if given positionally.
    pub device: Option<(String, u32)>,
    /// Firmware file.
    pub firmware: PathBuf,
}

impl UpdateTarget {
    /// Interpret the bare positional arguments.
    ///
    /// Accepts `<file>` or `<device> <baud> <file>`.
    pub fn from_args(args: &[String]) -> Result<Self> {
        match args {
            [file] => Ok(Self {
                device: None,
                firmware: PathBuf::from(file),
            }),
            [device, baud, file] => {
                let baud = baud.parse::<u32>().map_err(|_| {
                    CliError::Usage(format!("Invalid baud rate '{baud}'"))
                })?;
                Ok(Self {
                    device: Some((device.clone(), baud)),
                    firmware: PathBuf::from(file),
                })
            },
            _ => Err(CliError::Usage(
                "Expected <FIRMWARE> or <DEVICE> <BAUD> <FIRMWARE>".to_string(),
            )
            .into()),
        }
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
    {
        pb.set_style(bar_style.progress_chars("#>-"));
    }
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Update command implementation.
pub(crate) fn cmd_update(cli: &Cli, config: &Config, target: &UpdateTarget) -> Result<()> {
    let firmware: &Path = &target.firmware;
    if !firmware.is_file() {
        return Err(scsflash::Error::FileOpen {
            path: firmware.to_path_buf(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
        .context("Cannot start update");
    }

    let options = SerialOptions {
        port: target
            .device
            .as_ref()
            .map(|(name, _)| name.clone())
            .or_else(|| cli.port.clone()),
        baud: target
            .device
            .as_ref()
            .map(|(_, baud)| *baud)
            .or(cli.baud),
        non_interactive: cli.non_interactive,
    };
    let selected = select_modem_port(&options, config)?;
    let mut port = open_port(&selected, &options, config)?;

    let profile = {
        let mut modem = ModemCommands::new(&mut port);
        modem
            .wake()
            .context("Modem did not answer")?;
        let profile = modem.query_version()?;
        if !cli.quiet {
            eprintln!(
                "{} Modem: {} (firmware files: .{})",
                style("ℹ").blue(),
                style(profile.name).cyan().bold(),
                profile.extension
            );
        }
        match modem.query_serial_number() {
            Ok(Some(serial)) if !cli.quiet => {
                eprintln!("{} Serial number: {serial:X}", style("ℹ").blue());
            },
            Ok(_) => {},
            Err(e) => warn!("Could not read serial number: {e}"),
        }
        profile
    };

    let transfer_config = TransferConfig {
        check_timestamp: cli.check_timestamp || config.update.check_timestamp,
        ..TransferConfig::default()
    };
    let mut updater =
        Updater::with_config(&mut port, transfer_config).with_cancel_token(cancel_token().clone());

    let pb = progress_bar(cli.quiet);
    let quiet = cli.quiet;
    let result = updater.update_file(profile, firmware, |event| match event {
        TransferEvent::FlashIdentified { flash_id, stamp } => {
            pb.set_message(format!("flash {flash_id:04X}, installed {stamp}"));
        },
        TransferEvent::FlashStampInvalid { .. } if !quiet => {
            pb.suspend(|| {
                eprintln!(
                    "{} Installed firmware has no valid time stamp",
                    style("⚠").yellow()
                );
            });
        },
        TransferEvent::Negotiated { total_chunks, .. } => {
            pb.set_message(format!("{total_chunks} blocks"));
        },
        TransferEvent::ChunkWritten { percent, .. } => {
            pb.set_position(u64::from(*percent));
        },
        TransferEvent::Completed => pb.finish_with_message("done"),
        _ => {},
    });

    if result.is_err() {
        pb.abandon();
    }
    result.with_context(|| format!("Update with {} failed", firmware.display()))?;

    if !quiet {
        eprintln!(
            "\n{} {} updated, the modem restarts with the new firmware",
            style("✓").green().bold(),
            profile.name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_target_file_only() {
        let target = UpdateTarget::from_args(&args(&["ptc3.p3u"])).unwrap();
        assert_eq!(target.device, None);
        assert_eq!(target.firmware, PathBuf::from("ptc3.p3u"));
    }

    #[test]
    fn test_target_with_device() {
        let target =
            UpdateTarget::from_args(&args(&["/dev/ttyUSB0", "829440", "dragon.dr7"])).unwrap();
        assert_eq!(target.device, Some(("/dev/ttyUSB0".to_string(), 829440)));
        assert_eq!(target.firmware, PathBuf::from("dragon.dr7"));
    }

    #[test]
    fn test_target_bad_forms_are_usage_errors() {
        for bad in [
            args(&[]),
            args(&["/dev/ttyUSB0", "ptc3.p3u"]),
            args(&["/dev/ttyUSB0", "fast", "ptc3.p3u"]),
        ] {
            let err = UpdateTarget::from_args(&bad).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<CliError>(),
                Some(CliError::Usage(_))
            ));
        }
    }
}
