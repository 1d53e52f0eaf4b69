mod cli;
mod config;
mod configuration;
mod deps;
mod error;
mod probe;
mod prompt;
mod runner;
mod service;
mod templates;
mod tunnel;
mod uninstall;
mod utils;
mod workspace;

use std::process::ExitCode;

use clap::Parser;
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "blur360_setup=debug"
    } else {
        "blur360_setup=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    match cli.execute().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {} {}", style("✕").red().bold(), e);
            if let Some(follow_up) = e.follow_up() {
                eprintln!("    {}", style(follow_up).yellow());
            }
            ExitCode::FAILURE
        }
    }
}
