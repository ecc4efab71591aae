//! Shell completion scripts.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use console::style;
use directories::BaseDirs;

use crate::{Cli, CliError};

const BIN_NAME: &str = "scsflash";

fn render(shell: Shell, out: &mut dyn io::Write) {
    generate(shell, &mut Cli::command(), BIN_NAME, out);
}

/// Print the completion script for `shell` to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    render(shell, &mut io::stdout());
}

/// Guess the user's shell from `$SHELL` (or PowerShell on Windows).
pub(crate) fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }
    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }
    None
}

fn shell_from_path(shell_path: &str) -> Option<Shell> {
    match Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())?
    {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

/// Where the completion script for `shell` is picked up automatically.
fn install_path(dirs: &BaseDirs, shell: Shell) -> Option<PathBuf> {
    let path = match shell {
        Shell::Bash => dirs
            .data_dir()
            .join("bash-completion/completions")
            .join(BIN_NAME),
        Shell::Zsh => dirs
            .home_dir()
            .join(".zfunc")
            .join(format!("_{BIN_NAME}")),
        Shell::Fish => dirs
            .config_dir()
            .join("fish/completions")
            .join(format!("{BIN_NAME}.fish")),
        Shell::Elvish => dirs
            .config_dir()
            .join("elvish/lib")
            .join(format!("{BIN_NAME}.elv")),
        Shell::PowerShell => dirs
            .config_dir()
            .join("powershell/completions")
            .join(format!("{BIN_NAME}.ps1")),
        _ => return None,
    };
    Some(path)
}

fn activation_hint(shell: Shell, path: &Path) -> String {
    match shell {
        Shell::Bash => format!("source {}", path.display()),
        Shell::Zsh => "add `fpath=(~/.zfunc $fpath)` before `compinit` in ~/.zshrc".to_string(),
        Shell::PowerShell => format!(". {}", path.display()),
        _ => "open a new shell".to_string(),
    }
}

/// Write the completion script to the shell's standard location.
pub(crate) fn cmd_completions_install(shell: Option<Shell>) -> Result<()> {
    let shell = shell
        .or_else(detect_shell_type)
        .ok_or_else(|| {
            CliError::Usage(format!(
                "Could not detect your shell, name it explicitly: {BIN_NAME} completions --install bash"
            ))
        })?;
    let dirs = BaseDirs::new().context("Could not determine home directory")?;
    let path = install_path(&dirs, shell)
        .ok_or_else(|| CliError::Usage(format!("Cannot install completions for {shell}")))?;

    let mut script = Vec::new();
    render(shell, &mut script);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(&path, &script)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    eprintln!(
        "{} Installed {shell} completions to {}",
        style("✓").green().bold(),
        style(path.display()).yellow()
    );
    eprintln!("  To activate: {}", style(activation_hint(shell, &path)).cyan());
    Ok(())
}
