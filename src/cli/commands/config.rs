use std::path::PathBuf;

use console::style;

use crate::config::SetupConfig;
use crate::configuration::{ConfigStore, Mutation};
use crate::error::{Result, SetupError};

fn store(setup: &SetupConfig, dir: Option<PathBuf>) -> Result<ConfigStore> {
    let root = super::default_dir(setup, dir);
    let store = ConfigStore::new(root.join(crate::workspace::CONFIG_FILE));
    if !store.exists() {
        return Err(SetupError::fatal_with_hint(
            format!("No config.ini in {}", root.display()),
            "Pass --dir <installation> or run: blur360-setup install",
        ));
    }
    Ok(store)
}

/// Split `section.key`.
pub fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('.') {
        Some((section, name)) if !section.is_empty() && !name.is_empty() => Ok((section, name)),
        _ => Err(SetupError::Config(format!(
            "Invalid key '{}'. Use section.key, e.g. server.port",
            key
        ))),
    }
}

pub fn show(setup: &SetupConfig, dir: Option<PathBuf>) -> Result<()> {
    let store = store(setup, dir)?;
    let settings = store.load()?.settings();
    let unset = || style("(unset)".to_string()).dim();

    println!("{}", style("Blur360 Configuration").bold().cyan());
    println!();
    println!("  {}", style("[server]").dim());
    println!("  host             {}", style(&settings.server.host).white());
    println!("  port             {}", style(settings.server.port).white());
    println!("  debug            {}", settings.server.debug);
    println!("  {}", style("[processing]").dim());
    println!("  language         {}", style(&settings.processing.language).white());
    println!("  verbose_logging  {}", settings.processing.verbose_logging);
    println!(
        "  max_workers      {}",
        settings
            .processing
            .max_workers
            .map(|w| style(w.to_string()).white())
            .unwrap_or_else(unset)
    );
    println!("  {}", style("[cloudflare]").dim());
    println!(
        "  enabled          {}",
        if settings.cloudflare.enabled {
            style("enabled").green()
        } else {
            style("disabled").dim()
        }
    );
    println!(
        "  token            {}",
        settings
            .cloudflare
            .token
            .as_ref()
            .map(|_| style("(set)".to_string()).white())
            .unwrap_or_else(unset)
    );
    println!(
        "  hostname         {}",
        settings
            .cloudflare
            .hostname
            .map(|h| style(h).white())
            .unwrap_or_else(unset)
    );
    println!();
    println!("Config file: {}", style(store.path().display()).dim());
    Ok(())
}

pub fn get(setup: &SetupConfig, dir: Option<PathBuf>, key: &str) -> Result<()> {
    let (section, name) = split_key(key)?;
    let config = store(setup, dir)?.load()?;
    if !config.has_key(section, name) {
        return Err(SetupError::Config(format!("Unknown config key: {}", key)));
    }
    match config.get(section, name) {
        Some(value) => println!("{}", value),
        None => println!("{}", style("(unset)").dim()),
    }
    Ok(())
}

pub fn set(setup: &SetupConfig, dir: Option<PathBuf>, key: &str, value: &str) -> Result<()> {
    let (section, name) = split_key(key)?;
    let store = store(setup, dir)?;

    match store.mutate(section, name, value)? {
        Mutation::Updated => println!(
            "{} Set {} = {}",
            style("✓").green().bold(),
            style(key).cyan(),
            style(value).white()
        ),
        Mutation::Unchanged => println!("{} {} already {}", style("✓").green().bold(), key, value),
        Mutation::Absent => {
            println!(
                "{} Unknown config key: {}",
                style("!").yellow().bold(),
                style(key).red()
            );
            println!("\nconfig.ini is left unchanged; only keys already in the file can be set.");
        }
    }
    Ok(())
}
