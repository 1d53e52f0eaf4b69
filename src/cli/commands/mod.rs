pub mod config;
pub mod doctor;
pub mod install;
pub mod service;
pub mod tunnel;
pub mod uninstall;

use std::path::{Path, PathBuf};

use console::style;

use crate::config::SetupConfig;
use crate::error::{Result, SetupError};
use crate::prompt::Prompter;
use crate::workspace::{absolutize, InstallationWorkspace, ENTRY_MARKER};

const BANNER: &str = r#"
╔═══════════════════════════════╗
║  b l u r 3 6 0                ║
║  server setup                 ║
╚═══════════════════════════════╝
"#;

pub fn print_banner() {
    println!("{}", style(BANNER).cyan());
}

pub fn print_step(message: &str) {
    println!();
    println!("  {} {}", style("◐").cyan(), style(message).dim());
}

pub fn print_ok(message: impl std::fmt::Display) {
    println!("  {} {}", style("✓").green().bold(), message);
}

pub fn print_warn(message: impl std::fmt::Display) {
    println!("  {} {}", style("!").yellow().bold(), message);
}

/// `--dir` if given, else the configured default install directory.
pub fn default_dir(setup: &SetupConfig, dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| setup.default_install_dir())
}

/// Ask for an existing installation and make it the working directory.
pub fn prompt_installation(
    prompter: &mut dyn Prompter,
    default: &Path,
) -> Result<InstallationWorkspace> {
    let default_display = default.display().to_string();
    let answer = prompter.input("Installation directory", Some(default_display.as_str()))?;
    let dir = absolutize(&answer, default, &std::env::current_dir()?);
    open_installation(&dir)
}

/// Open `dir` as an installed workspace; it must contain the entry point.
pub fn open_installation(dir: &Path) -> Result<InstallationWorkspace> {
    let workspace = InstallationWorkspace::open(dir);
    if !workspace.has_entry_marker() {
        return Err(SetupError::fatal_with_hint(
            format!("No Blur360 installation in {} ({} missing)", dir.display(), ENTRY_MARKER),
            "Run: blur360-setup install",
        ));
    }
    workspace.enter()?;
    Ok(workspace)
}
