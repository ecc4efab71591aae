//! Commands that talk to the modem's `cmd:` prompt.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, Utc};
use console::style;
use scsflash::{ModemCommands, NativePort};

use crate::Cli;
use crate::config::Config;
use crate::serial::{SerialOptions, open_port, select_modem_port};

fn connect(cli: &Cli, config: &Config) -> Result<NativePort> {
    let options = SerialOptions {
        port: cli.port.clone(),
        baud: cli.baud,
        non_interactive: cli.non_interactive,
    };
    let selected = select_modem_port(&options, config)?;
    let mut port = open_port(&selected, &options, config)?;
    ModemCommands::new(&mut port)
        .wake()
        .context("Modem did not answer")?;
    Ok(port)
}

/// Query command implementation.
pub(crate) fn cmd_query(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut port = connect(cli, config)?;
    let info = ModemCommands::new(&mut port).identify()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("{}", style("Modem Information").bold().underlined());
    println!("  Type:           {} ({})", info.profile.name, info.profile.version_code);
    println!("  Firmware files: .{} ({} format)", info.profile.extension, info.profile.format);
    match info.serial_number {
        Some(serial) => println!("  Serial number:  {serial:X}"),
        None => println!("  Serial number:  {}", style("unknown").dim()),
    }
    match info.pactor_channel {
        Some(channel) => println!("  PACTOR channel: {channel}"),
        None => println!("  PACTOR channel: {}", style("unknown").dim()),
    }
    Ok(())
}

/// Current wall-clock time in the zone the modem should run on.
pub(crate) fn clock_now(utc: bool) -> NaiveDateTime {
    if utc {
        Utc::now().naive_utc()
    } else {
        Local::now().naive_local()
    }
}

/// Set-clock command implementation.
pub(crate) fn cmd_set_clock(cli: &Cli, config: &Config, utc: bool) -> Result<()> {
    let mut port = connect(cli, config)?;
    let now = clock_now(utc || config.modem.utc);
    ModemCommands::new(&mut port).set_clock(&now)?;

    if !cli.quiet {
        eprintln!(
            "{} Modem clock set to {}{}",
            style("✓").green().bold(),
            now.format("%Y-%m-%d %H:%M:%S"),
            if utc || config.modem.utc { " UTC" } else { "" }
        );
    }
    Ok(())
}

/// Send-file command implementation.
pub(crate) fn cmd_send_file(cli: &Cli, config: &Config, path: &Path) -> Result<()> {
    let mut port = connect(cli, config)?;
    let sent = ModemCommands::new(&mut port)
        .replay_command_file(path)
        .with_context(|| format!("Failed to replay {}", path.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Sent {sent} commands from {}",
            style("✓").green().bold(),
            path.display()
        );
    }
    Ok(())
}
