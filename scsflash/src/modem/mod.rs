//! Modem types and the command-line interface the modem firmware offers.

pub mod commands;
pub mod profile;

pub use commands::ModemCommands;
pub use profile::{MODEM_PROFILES, ModemProfile};
