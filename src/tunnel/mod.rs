//! Cloudflare tunnel provisioning.
//!
//! Installs the tunnel client when missing, collects the token and public
//! hostname, writes the ingress document, records the tunnel in config.ini and
//! optionally registers the tunnel as a second service unit.

pub mod document;
pub mod install;

use std::path::PathBuf;

use console::style;
use regex_lite::Regex;

pub use document::TunnelDefinition;
pub use install::{ensure_client, InstallerRegistry};

use crate::config::SetupConfig;
use crate::configuration::{format_bool, ConfigStore, Mutation, DEFAULT_PORT};
use crate::error::{Outcome, Result, SetupError};
use crate::probe::Capabilities;
use crate::prompt::Prompter;
use crate::runner::{CommandRunner, CommandSpec};
use crate::service::{ServiceDefinition, ServiceRegistrar};
use crate::templates::TemplateRegistry;
use crate::workspace::InstallationWorkspace;

/// Where cloudflared keeps tunnel credentials for `user`, the account the
/// tunnel unit runs as. Unknown users fall back to the current home.
pub fn credentials_path(user: &str) -> Result<PathBuf> {
    let home = home_of(user)
        .or_else(dirs::home_dir)
        .ok_or_else(|| SetupError::Config("Could not determine home directory".to_string()))?;
    Ok(home.join(".cloudflared").join("credentials.json"))
}

#[cfg(unix)]
fn home_of(user: &str) -> Option<PathBuf> {
    nix::unistd::User::from_name(user).ok().flatten().map(|u| u.dir)
}

#[cfg(not(unix))]
fn home_of(_user: &str) -> Option<PathBuf> {
    None
}

pub fn is_valid_hostname(hostname: &str) -> bool {
    let Ok(pattern) = Regex::new(
        r"^([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,63}$",
    ) else {
        return false;
    };
    hostname.len() <= 253 && pattern.is_match(hostname)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelReport {
    pub definition: TunnelDefinition,
    pub document: PathBuf,
    pub client_installed: bool,
    pub service_registered: bool,
    /// Keys config.ini had no slot for; they were not written.
    pub absent_keys: Vec<String>,
}

pub struct TunnelProvisioner<'a> {
    runner: &'a dyn CommandRunner,
    caps: &'a Capabilities,
    setup: &'a SetupConfig,
    workspace: &'a InstallationWorkspace,
    installers: InstallerRegistry,
}

impl<'a> TunnelProvisioner<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        caps: &'a Capabilities,
        setup: &'a SetupConfig,
        workspace: &'a InstallationWorkspace,
    ) -> Self {
        Self {
            runner,
            caps,
            setup,
            workspace,
            installers: InstallerRegistry::with_defaults(),
        }
    }

    pub async fn provision(
        &self,
        prompter: &mut dyn Prompter,
        templates: &TemplateRegistry,
        credentials_file: PathBuf,
    ) -> Result<Outcome<TunnelReport>> {
        let client_installed = ensure_client(self.runner, self.caps, &self.installers).await?;
        if client_installed {
            println!("  {} cloudflared installed", style("✓").green().bold());
        }

        if !prompter.confirm("Do you have a Cloudflare tunnel token?", false)? {
            self.explain_token_setup(prompter).await?;
            return Ok(Outcome::Declined);
        }

        let token = loop {
            let token = prompter.input("Tunnel token", None)?;
            if !token.is_empty() {
                break token;
            }
            println!("  {} The token cannot be empty", style("!").yellow().bold());
        };

        let hostname = loop {
            let hostname = prompter.input("Public hostname (e.g. blur.example.com)", None)?;
            if is_valid_hostname(&hostname) {
                break hostname.to_lowercase();
            }
            println!(
                "  {} '{}' is not a valid hostname",
                style("!").yellow().bold(),
                hostname
            );
        };

        let store = ConfigStore::new(self.workspace.config_path());
        store.synthesize()?;
        let config = store.load()?;

        let definition = TunnelDefinition {
            token,
            hostname,
            port: config.read_port("server", "port", DEFAULT_PORT),
            log_file: self.workspace.tunnel_log_path(),
            credentials_file,
        };

        let document = self.workspace.tunnel_config_path();
        document::write(&definition, templates, &document)?;
        println!(
            "  {} Tunnel routes {} to {}",
            style("✓").green().bold(),
            style(&definition.hostname).cyan(),
            definition.local_service()
        );

        let mut absent_keys = Vec::new();
        store.edit(|config| {
            let mut changed = false;
            for (key, value) in [
                ("enabled", format_bool(true)),
                ("token", definition.token.as_str()),
                ("hostname", definition.hostname.as_str()),
            ] {
                match config.mutate("cloudflare", key, value)? {
                    Mutation::Updated => changed = true,
                    Mutation::Unchanged => {}
                    Mutation::Absent => {
                        tracing::warn!("config.ini has no cloudflare.{} entry; left untouched", key);
                        absent_keys.push(format!("cloudflare.{}", key));
                    }
                }
            }
            Ok(changed)
        })?;

        let service_registered = self.offer_service(prompter, templates).await?;

        Ok(Outcome::Done(TunnelReport {
            definition,
            document,
            client_installed,
            service_registered,
            absent_keys,
        }))
    }

    async fn explain_token_setup(&self, prompter: &mut dyn Prompter) -> Result<()> {
        println!();
        println!("  To create a tunnel token:");
        println!("    1. Open {}", style(&self.setup.dashboard_url).cyan());
        println!("    2. Networks > Tunnels > Create a tunnel (type: Cloudflared)");
        println!("    3. Copy the token from the install command");
        println!(
            "    4. Run {} when you have it",
            style("blur360-setup tunnel").cyan()
        );
        println!();

        if prompter.confirm("Open the Cloudflare dashboard now?", false)? {
            let opener = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
            let out = self
                .runner
                .run(&CommandSpec::new(opener).arg(&self.setup.dashboard_url))
                .await?;
            if !out.success {
                println!(
                    "  {} Could not open a browser; visit {}",
                    style("!").yellow().bold(),
                    self.setup.dashboard_url
                );
            }
        }
        Ok(())
    }

    async fn offer_service(
        &self,
        prompter: &mut dyn Prompter,
        templates: &TemplateRegistry,
    ) -> Result<bool> {
        if !self.caps.service_manager {
            println!(
                "  {} No systemd; run the tunnel with: cloudflared tunnel --config {} run",
                style("!").yellow().bold(),
                self.workspace.tunnel_config_path().display()
            );
            return Ok(false);
        }
        if !prompter.confirm("Run the tunnel as a system service?", true)? {
            return Ok(false);
        }

        let user = whoami();
        let def = ServiceDefinition::tunnel(
            &self.setup.tunnel_unit,
            &self.setup.app_unit,
            self.workspace,
            &user,
            &install::client_path(),
        );
        let registrar =
            ServiceRegistrar::new(self.runner, self.caps, &self.setup.service_registry_dir);
        registrar
            .register(&def, templates, &self.workspace.services_dir(), true)
            .await?;
        println!(
            "  {} {} enabled and started",
            style("✓").green().bold(),
            style(def.unit_file_name()).cyan()
        );
        Ok(true)
    }
}

/// Login name of the invoking user, preferring the sudo caller.
pub fn whoami() -> String {
    std::env::var("SUDO_USER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "root".to_string())
}
