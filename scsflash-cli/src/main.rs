//! scsflash CLI - firmware updates for SCS PTC and P4dragon modems.
//!
//! ## Features
//!
//! - Update modem firmware (auto-detected or explicit port)
//! - Inspect firmware files offline
//! - Query the modem type and set its clock
//! - Replay command files at the `cmd:` prompt
//! - Shell completion generation
//! - Environment variable and config file support

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::{debug, warn};
use scsflash::CancelToken;

mod commands;
mod config;
mod serial;

use commands::info::FormatArg;
use commands::update::UpdateTarget;
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Process-wide cancellation flag, raised by Ctrl-C.
pub(crate) fn cancel_token() -> &'static CancelToken {
    static TOKEN: OnceLock<CancelToken> = OnceLock::new();
    TOKEN.get_or_init(CancelToken::new)
}

/// Errors that map to a specific exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad arguments or a choice that needs a human.
    #[error("{0}")]
    Usage(String),
    /// Unreadable or invalid configuration file.
    #[error("{0}")]
    Config(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// Exit code for a failed run.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return match cli {
                CliError::Usage(_) => 2,
                CliError::Config(_) => 3,
                CliError::Cancelled(_) => 130,
            };
        }
        if let Some(lib) = cause.downcast_ref::<scsflash::Error>() {
            match lib {
                scsflash::Error::DeviceNotFound => return 4,
                scsflash::Error::Cancelled => return 130,
                _ => {},
            }
        }
    }
    1
}

/// scsflash - firmware update tool for SCS PTC and P4dragon modems.
///
/// Run `scsflash <FIRMWARE>` to update the attached modem, or
/// `scsflash <DEVICE> <BAUD> <FIRMWARE>` to name the port yourself.
///
/// Environment variables:
///   SCSFLASH_PORT              - Default serial port
///   SCSFLASH_BAUD              - Default baud rate
///   SCSFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "scsflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "SCSFLASH_PORT")]
    pub port: Option<String>,

    /// Baud rate (defaults to the modem's usual speed).
    #[arg(short, long, global = true, env = "SCSFLASH_BAUD")]
    pub baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "SCSFLASH_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Refuse firmware that is not newer than the installed one.
    #[arg(long, global = true)]
    pub check_timestamp: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// `<FIRMWARE>` or `<DEVICE> <BAUD> <FIRMWARE>`.
    #[arg(value_name = "ARGS", num_args = 0..=3)]
    pub args: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Validate a firmware file and show what it contains.
    Info {
        /// Path to the firmware file.
        firmware: PathBuf,

        /// Header layout (guessed from the extension if omitted).
        #[arg(long, value_enum)]
        format: Option<FormatArg>,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List attached SCS modems.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// Include serial ports that are not SCS modems.
        #[arg(long)]
        all: bool,
    },

    /// Show modem type, serial number and PACTOR channel.
    Query {
        /// Output modem information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Set the modem clock to the current time.
    SetClock {
        /// Use UTC instead of local time.
        #[arg(long)]
        utc: bool,
    },

    /// Send each line of a file as a modem command.
    SendFile {
        /// Command file.
        file: PathBuf,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (auto-detected with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Install completions into your shell's completion directory.
        #[arg(long)]
        install: bool,
    },
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        let token = cancel_token();
        if token.is_cancelled() {
            std::process::exit(130);
        }
        token.cancel();
        eprintln!("\n{} Interrupted, aborting...", style("⚠").yellow());
    });
    if let Err(e) = result {
        warn!("Could not install Ctrl-C handler: {e}");
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    match &cli.command {
        Some(Commands::Info {
            firmware,
            format,
            json,
        }) => commands::info::cmd_info(firmware, *format, *json),
        Some(Commands::ListPorts { json, all }) => {
            commands::ports::cmd_list_ports(*json, *all);
            Ok(())
        },
        Some(Commands::Query { json }) => commands::modem::cmd_query(cli, &config, *json),
        Some(Commands::SetClock { utc }) => commands::modem::cmd_set_clock(cli, &config, *utc),
        Some(Commands::SendFile { file }) => commands::modem::cmd_send_file(cli, &config, file),
        Some(Commands::Completions { shell, install }) => {
            if *install {
                return commands::completions::cmd_completions_install(*shell);
            }
            let shell = shell.ok_or_else(|| {
                CliError::Usage(
                    "Specify a shell, e.g. `scsflash completions bash`, or use --install"
                        .to_string(),
                )
            })?;
            commands::completions::cmd_completions(shell);
            Ok(())
        },
        None => {
            let target = UpdateTarget::from_args(&cli.args)?;
            commands::update::cmd_update(cli, &config, &target)
        },
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    if cli.command.is_none() && cli.args.is_empty() {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    }

    init_logging(&cli);
    debug!(
        "scsflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}
