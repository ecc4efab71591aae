//! Configuration file support for scsflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SCSFLASH_*)
//! 3. Local config file (./scsflash.toml)
//! 4. Global config file (~/.config/scsflash/config.toml)
//!
//! `--config <PATH>` replaces both files with the given one.
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//!
//! [update]
//! check_timestamp = true
//!
//! [modem]
//! utc = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::CliError;

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "scsflash.toml";

/// Serial connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Baud rate used when the modem model does not imply one.
    pub baud: Option<u32>,
}

/// Firmware update settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UpdateConfig {
    /// Refuse files that are not newer than the installed firmware.
    #[serde(default)]
    pub check_timestamp: bool,
}

/// Settings for the auxiliary modem commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ModemConfig {
    /// Set the modem clock to UTC instead of local time.
    #[serde(default)]
    pub utc: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Update configuration.
    #[serde(default)]
    pub update: UpdateConfig,
    /// Modem command configuration.
    #[serde(default)]
    pub modem: ModemConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    ///
    /// Files that are missing are skipped; files that cannot be parsed are
    /// skipped with a warning.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            match Self::load_from_file(&global_path) {
                Ok(Some(global)) => {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global);
                },
                Ok(None) => {},
                Err(e) => warn!("{e}"),
            }
        }

        match Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            Ok(Some(local)) => {
                debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
                config.merge(local);
            },
            Ok(None) => {},
            Err(e) => warn!("{e}"),
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// An explicitly requested file must exist and parse.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match Self::load_from_file(path)? {
            Some(config) => {
                debug!("Loaded config from {}", path.display());
                Ok(config)
            },
            None => Err(CliError::Config(format!(
                "Config file {} does not exist",
                path.display()
            ))
            .into()),
        }
    }

    /// Parse `path`. Returns `Ok(None)` when the file does not exist.
    fn load_from_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;
        Ok(Some(config))
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "scsflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; values set in `other` win.
    fn merge(&mut self, other: Self) {
        if other
            .connection
            .port
            .is_some()
        {
            self.connection.port = other.connection.port;
        }
        if other
            .connection
            .baud
            .is_some()
        {
            self.connection.baud = other.connection.baud;
        }
        if other.update.check_timestamp {
            self.update.check_timestamp = true;
        }
        if other.modem.utc {
            self.modem.utc = true;
        }
    }
}
