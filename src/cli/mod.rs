pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::SetupConfig;
use crate::error::Result;

#[derive(Parser)]
#[command(name = "blur360-setup")]
#[command(version)]
#[command(about = "Install and manage a Blur360 video anonymisation server")]
#[command(long_about = "Fetches Blur360, builds its Python environment, writes config.ini and optionally\nregisters systemd services and a Cloudflare tunnel.\n\nEvery step is interactive; defaults are shown in brackets.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Installation directory offered as the prompt default
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install Blur360 into a directory
    Install,

    /// Remove an installation
    Uninstall,

    /// Register the web app as a systemd service
    Service {
        /// Enable the unit without starting it
        #[arg(long)]
        no_start: bool,
    },

    /// Set up a Cloudflare tunnel for an installation
    Tunnel,

    /// Inspect or change an installation's config.ini
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show what this host provides, without changing anything
    Doctor,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show all settings
    Show,

    /// Print one value
    Get {
        /// Key as section.key, e.g. server.port
        key: String,
    },

    /// Change an existing value
    Set {
        /// Key as section.key, e.g. server.port
        key: String,
        /// New value
        value: String,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let setup = SetupConfig::load()?;
        let dir = self.dir;

        match self.command {
            Commands::Install => commands::install::execute(&setup, dir).await,
            Commands::Uninstall => commands::uninstall::execute(&setup, dir).await,
            Commands::Service { no_start } => {
                commands::service::execute(&setup, dir, !no_start).await
            }
            Commands::Tunnel => commands::tunnel::execute(&setup, dir).await,
            Commands::Config { command } => match command {
                ConfigCommands::Show => commands::config::show(&setup, dir),
                ConfigCommands::Get { key } => commands::config::get(&setup, dir, &key),
                ConfigCommands::Set { key, value } => {
                    commands::config::set(&setup, dir, &key, &value)
                }
            },
            Commands::Doctor => commands::doctor::execute(&setup).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_set() {
        let cli = Cli::parse_from(["blur360-setup", "config", "set", "server.port", "8080"]);
        match cli.command {
            Commands::Config {
                command: ConfigCommands::Set { key, value },
            } => {
                assert_eq!(key, "server.port");
                assert_eq!(value, "8080");
            }
            _ => panic!("expected config set"),
        }
    }

    #[test]
    fn test_global_dir_flag() {
        let cli = Cli::parse_from(["blur360-setup", "service", "--dir", "/opt/app", "--no-start"]);
        assert_eq!(cli.dir, Some(PathBuf::from("/opt/app")));
        assert!(matches!(cli.command, Commands::Service { no_start: true }));
    }
}
