use std::path::PathBuf;

use console::style;

use crate::config::SetupConfig;
use crate::error::Result;
use crate::probe::{probe, Capabilities};
use crate::prompt::TermPrompter;
use crate::runner::{CommandRunner, SystemRunner};
use crate::service::{ServiceDefinition, ServiceRegistrar};
use crate::templates::TemplateRegistry;
use crate::tunnel::whoami;
use crate::workspace::InstallationWorkspace;

pub async fn execute(setup: &SetupConfig, dir: Option<PathBuf>, start: bool) -> Result<()> {
    let runner = SystemRunner::new();
    let caps = probe(&runner, &setup.python).await?;
    let mut prompter = TermPrompter;

    super::print_banner();
    let workspace = super::prompt_installation(&mut prompter, &super::default_dir(setup, dir))?;
    register_app(&runner, &caps, setup, &workspace, start).await
}

/// Register the web app unit for `workspace`, shared with the install flow.
pub async fn register_app(
    runner: &dyn CommandRunner,
    caps: &Capabilities,
    setup: &SetupConfig,
    workspace: &InstallationWorkspace,
    start: bool,
) -> Result<()> {
    let registrar = ServiceRegistrar::new(runner, caps, &setup.service_registry_dir);
    registrar.check_preconditions()?;

    TemplateRegistry::materialize(&workspace.services_dir())?;
    let templates = TemplateRegistry::for_workspace(&workspace.services_dir())?;
    let def = ServiceDefinition::app(&setup.app_unit, workspace, &whoami());

    super::print_step(&format!("Registering {}...", def.unit_file_name()));
    registrar
        .register(&def, &templates, &workspace.services_dir(), start)
        .await?;

    super::print_ok(format!(
        "{} {}",
        style(def.unit_file_name()).cyan(),
        if start { "enabled and started" } else { "enabled" }
    ));
    println!(
        "    {}",
        style(format!("sudo systemctl status {}", def.unit_file_name())).dim()
    );
    Ok(())
}
