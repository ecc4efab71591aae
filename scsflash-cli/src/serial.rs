//! Choosing and opening the modem's serial port.
//!
//! A port given on the command line (or through `SCSFLASH_PORT`) wins, then
//! the one from the config file. Otherwise attached SCS modems are detected
//! over USB; with more than one the user picks from a list.

use std::io::IsTerminal;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme};
use log::{debug, info};
use scsflash::{DetectedPort, NativePort, SerialConfig, discover_ports, discover_scs_modems};

use crate::CliError;
use crate::config::Config;

/// Speed used when neither the user nor the modem model decides.
pub const FALLBACK_BAUD: u32 = 115_200;

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Explicit baud rate specified via CLI or environment.
    pub baud: Option<u32>,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
}

/// Pick the port to talk to.
pub fn select_modem_port(options: &SerialOptions, config: &Config) -> Result<DetectedPort> {
    if let Some(name) = &options.port {
        return Ok(find_port_by_name(name));
    }

    if let Some(name) = &config.connection.port {
        debug!("Using port from config: {name}");
        return Ok(find_port_by_name(name));
    }

    pick_detected(discover_scs_modems(), options.non_interactive)
}

/// Open the selected port at the resolved speed.
pub fn open_port(port: &DetectedPort, options: &SerialOptions, config: &Config) -> Result<NativePort> {
    let baud = resolve_baud(options.baud, config, port);
    info!("Using {} at {baud} baud", port.name);
    NativePort::open(&SerialConfig::new(port.name.clone(), baud))
        .with_context(|| format!("Failed to open {}", port.name))
}

/// CLI/env first, then config, then whatever the USB model implies.
pub fn resolve_baud(explicit: Option<u32>, config: &Config, port: &DetectedPort) -> u32 {
    explicit
        .or(config.connection.baud)
        .or_else(|| port.default_baud())
        .unwrap_or(FALLBACK_BAUD)
}

fn pick_detected(mut ports: Vec<DetectedPort>, non_interactive: bool) -> Result<DetectedPort> {
    match ports.len() {
        0 => Err(scsflash::Error::DeviceNotFound.into()),
        1 => {
            let port = ports.remove(0);
            if let Some(model) = port.model {
                info!("Auto-selected {} on {}", model.name(), port.name);
            }
            Ok(port)
        },
        n if non_interactive => Err(CliError::Usage(format!(
            "{n} SCS modems found; choose one with --port"
        ))
        .into()),
        _ => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "Several SCS modems found and no terminal to ask; choose one with --port".to_string(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) if io_err.kind() == std::io::ErrorKind::Interrupted => {
            CliError::Cancelled("Port selection cancelled".to_string()).into()
        },
        DialoguerError::IO(io_err) => {
            CliError::Usage(format!("Port selection prompt failed: {io_err}")).into()
        },
    }
}

fn select_port_interactive(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    eprintln!(
        "{} {} SCS modems found",
        style("ℹ").blue(),
        ports.len()
    );

    let labels = scsflash::device::format_port_list(&ports);
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the modem to use")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Look up `name` among the host's ports so the model is known when possible.
fn find_port_by_name(name: &str) -> DetectedPort {
    let ports = discover_ports();

    if let Some(port) = ports
        .iter()
        .find(|p| p.name == name || p.name.eq_ignore_ascii_case(name))
    {
        return port.clone();
    }

    DetectedPort {
        name: name.to_string(),
        model: None,
        vid: None,
        pid: None,
        manufacturer: None,
        product: None,
        serial: None,
    }
}
