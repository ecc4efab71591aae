//! Requests issued at the modem's `cmd:` prompt.
//!
//! Outside update mode the modem runs a line-oriented command interpreter.
//! Every command is answered by zero or more text lines followed by the
//! `cmd: ` prompt.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::NaiveDateTime;
use log::{debug, error, info};

use crate::error::Result;
use crate::modem::profile::ModemProfile;
use crate::port::Port;
use crate::protocol::channel::{self, Captured};

/// Prompt printed by the modem when it is ready for a command.
pub const PROMPT: &[u8] = b"cmd: ";

/// What `ModemCommands::identify` learned about the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ModemInfo {
    /// Modem type.
    pub profile: &'static ModemProfile,
    /// Factory serial number, if reported.
    pub serial_number: Option<u64>,
    /// PACTOR host-mode channel, if reported.
    pub pactor_channel: Option<u8>,
}

/// Command-mode client for one modem.
pub struct ModemCommands<'a, P: Port> {
    port: &'a mut P,
}

impl<'a, P: Port> ModemCommands<'a, P> {
    /// Talk to the modem on `port`.
    pub fn new(port: &'a mut P) -> Self {
        Self { port }
    }

    /// Send `cmd` and wait for the prompt, ignoring any output.
    pub fn command(&mut self, cmd: &[u8]) -> Result<()> {
        debug!("-> {:?}", String::from_utf8_lossy(cmd));
        self.port
            .write_all_bytes(cmd)?;
        loop {
            match channel::read_until(self.port, PROMPT) {
                Ok(Captured::Prompt) => return Ok(()),
                Ok(Captured::Line(_)) => {},
                Err(e) => {
                    error!(
                        "No prompt after {:?}",
                        String::from_utf8_lossy(cmd).trim_end()
                    );
                    return Err(e);
                },
            }
        }
    }

    /// Send a bare CR so the modem detects the baud rate and prints a prompt.
    pub fn wake(&mut self) -> Result<()> {
        self.command(b"\r")
    }

    /// Send `cmd` and collect every line up to the prompt.
    fn lines(&mut self, cmd: &[u8]) -> Result<Vec<String>> {
        debug!("-> {:?}", String::from_utf8_lossy(cmd));
        self.port
            .write_all_bytes(cmd)?;
        let mut lines = Vec::new();
        loop {
            match channel::read_until(self.port, PROMPT)? {
                Captured::Prompt => return Ok(lines),
                Captured::Line(line) => {
                    let line = String::from_utf8_lossy(&line).into_owned();
                    debug!("<- {line:?}");
                    lines.push(line);
                },
            }
        }
    }

    /// Ask the modem for its type.
    pub fn query_version(&mut self) -> Result<&'static ModemProfile> {
        let lines = self.lines(b"ver ##\r")?;
        let code = lines
            .iter()
            .filter_map(|line| line.strip_prefix("#0:"))
            .filter_map(|rest| rest.chars().next())
            .last()
            .unwrap_or('\0');

        match ModemProfile::find(code) {
            Ok(profile) => {
                info!("Modem detected: {}", profile.name);
                Ok(profile)
            },
            Err(e) => {
                error!("Unknown modem type: {code:?}");
                Err(e)
            },
        }
    }

    /// Read the factory serial number.
    pub fn query_serial_number(&mut self) -> Result<Option<u64>> {
        let lines = self.lines(b"sys sern\r")?;
        Ok(lines
            .iter()
            .filter(|line| line.starts_with("Ser"))
            .filter_map(|line| last_token(line))
            .filter_map(|token| u64::from_str_radix(token, 16).ok())
            .last())
    }

    /// Read the PACTOR host-mode channel.
    pub fn query_pactor_channel(&mut self) -> Result<Option<u8>> {
        let lines = self.lines(b"ptc\r")?;
        Ok(lines
            .iter()
            .filter(|line| line.starts_with("***"))
            .filter_map(|line| last_token(line))
            .filter_map(|token| token.parse().ok())
            .last())
    }

    /// Type, serial number and PACTOR channel in one go.
    pub fn identify(&mut self) -> Result<ModemInfo> {
        let profile = self.query_version()?;
        let serial_number = self.query_serial_number()?;
        let pactor_channel = self.query_pactor_channel()?;
        Ok(ModemInfo {
            profile,
            serial_number,
            pactor_channel,
        })
    }

    /// Set the modem's real-time clock.
    pub fn set_clock(&mut self, now: &NaiveDateTime) -> Result<()> {
        let date = now
            .format("date %d%m%y\r")
            .to_string();
        let time = now
            .format("time %H%M%S\r")
            .to_string();
        self.command(date.as_bytes())?;
        self.command(time.as_bytes())?;
        info!("Modem date & time set to {}", now.format("%d.%m.%y %H:%M:%S"));
        Ok(())
    }

    /// Send every line of a text file as a command.
    ///
    /// A file that cannot be opened is skipped with a log message.
    pub fn replay_command_file(&mut self, path: &Path) -> Result<usize> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                info!("Could not open command file {}: {e}", path.display());
                return Ok(0);
            },
        };

        let mut sent = 0;
        for line in BufReader::new(file).lines() {
            let mut cmd = line?;
            cmd.truncate(cmd.trim_end_matches('\r').len());
            cmd.push('\r');
            self.command(cmd.as_bytes())?;
            sent += 1;
        }
        debug!("Replayed {sent} commands from {}", path.display());
        Ok(sent)
    }
}

fn last_token(line: &str) -> Option<&str> {
    line.trim_end()
        .rsplit(' ')
        .next()
        .filter(|token| !token.is_empty())
}
