use std::path::PathBuf;

use console::style;

use crate::config::SetupConfig;
use crate::error::{Outcome, Result};
use crate::probe::{probe, Capabilities};
use crate::prompt::{Prompter, TermPrompter};
use crate::runner::{CommandRunner, SystemRunner};
use crate::templates::TemplateRegistry;
use crate::tunnel::{credentials_path, whoami, TunnelProvisioner};
use crate::workspace::InstallationWorkspace;

pub async fn execute(setup: &SetupConfig, dir: Option<PathBuf>) -> Result<()> {
    let runner = SystemRunner::new();
    let caps = probe(&runner, &setup.python).await?;
    let mut prompter = TermPrompter;

    super::print_banner();
    let workspace = super::prompt_installation(&mut prompter, &super::default_dir(setup, dir))?;
    provision(&runner, &caps, setup, &workspace, &mut prompter).await
}

/// Run the tunnel provisioner against `workspace`, shared with the install flow.
pub async fn provision(
    runner: &dyn CommandRunner,
    caps: &Capabilities,
    setup: &SetupConfig,
    workspace: &InstallationWorkspace,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    super::print_step("Setting up Cloudflare tunnel...");

    TemplateRegistry::materialize(&workspace.services_dir())?;
    let templates = TemplateRegistry::for_workspace(&workspace.services_dir())?;
    let provisioner = TunnelProvisioner::new(runner, caps, setup, workspace);

    match provisioner
        .provision(prompter, &templates, credentials_path(&whoami())?)
        .await?
    {
        Outcome::Declined => {
            println!("  {}", style("Tunnel setup skipped.").dim());
        }
        Outcome::Done(report) => {
            for key in &report.absent_keys {
                super::print_warn(format!(
                    "{} is missing from config.ini; add it by hand",
                    style(key).yellow()
                ));
            }
            super::print_ok(format!(
                "Tunnel ready: {}",
                style(format!("https://{}", report.definition.hostname)).cyan()
            ));
            println!(
                "    {} {}",
                style("Config").dim(),
                report.document.display()
            );
            if !report.service_registered {
                println!(
                    "    {}",
                    style(format!(
                        "cloudflared tunnel --config {} run",
                        report.document.display()
                    ))
                    .dim()
                );
            }
        }
    }
    Ok(())
}
