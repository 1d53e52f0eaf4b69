use std::path::{Path, PathBuf};
use std::time::Instant;

use console::style;

use crate::config::SetupConfig;
use crate::configuration::ConfigStore;
use crate::deps::{
    acquire_source, NetworkFetcher, OptionalOutcome, PythonEnv, SourceFetcher, SourceOrigin,
};
use crate::error::{Result, SetupError};
use crate::probe::{probe, Capabilities};
use crate::prompt::{Prompter, TermPrompter};
use crate::runner::{CommandRunner, SystemRunner};
use crate::templates::TemplateRegistry;
use crate::utils::format_duration;
use crate::workspace::resolve_workspace;

use super::{print_ok, print_step, print_warn};

pub async fn execute(setup: &SetupConfig, dir: Option<PathBuf>) -> Result<()> {
    let started = Instant::now();
    let runner = SystemRunner::new();
    let mut prompter = TermPrompter;

    super::print_banner();

    print_step("Checking environment...");
    let caps = probe(&runner, &setup.python).await?;
    let fetcher = NetworkFetcher::new(&runner)?;
    run(
        &runner,
        &fetcher,
        &caps,
        &mut prompter,
        setup,
        &super::default_dir(setup, dir),
        started,
    )
    .await
}

/// The install sequence after probing, in its fixed stage order.
pub async fn run(
    runner: &dyn CommandRunner,
    fetcher: &dyn SourceFetcher,
    caps: &Capabilities,
    prompter: &mut dyn Prompter,
    setup: &SetupConfig,
    default: &Path,
    started: Instant,
) -> Result<()> {
    let python = caps.require_python(setup.min_python_version())?;
    print_ok(format!("{} on {} ({})", python.raw, caps.os, caps.arch));
    if !caps.git {
        print_warn("git not found; the source will be downloaded as an archive");
    }

    let workspace = resolve_workspace(prompter, default)?;
    if !workspace.writable {
        return Err(SetupError::fatal_with_hint(
            format!("{} is not writable", workspace.root.display()),
            "Choose a directory you own, or re-run with sudo",
        ));
    }

    print_step("Fetching Blur360...");
    match acquire_source(fetcher, &setup.repo_url, &setup.archive_url, &workspace).await? {
        SourceOrigin::AlreadyPresent => print_ok("Source already present"),
        SourceOrigin::Cloned => print_ok(format!("Cloned {}", style(&setup.repo_url).dim())),
        SourceOrigin::Archive => print_ok(format!("Downloaded {}", style(&setup.archive_url).dim())),
    }
    workspace.create_layout()?;

    print_step("Setting up Python environment...");
    let env = PythonEnv::new(runner, &workspace);
    if env.create_venv(python).await? {
        print_ok("Virtual environment created");
    }
    env.install_requirements().await?;
    print_ok("Dependencies installed");

    let detector = if prompter.confirm(
        "Install the YOLO detector (ultralytics) for better face and plate detection?",
        true,
    )? {
        env.ensure_enhanced_detector().await?
    } else {
        OptionalOutcome::Skipped
    };
    report_optional("YOLO detector", &detector, "venv/bin/pip install ultralytics");

    let models = env.fetch_models().await?;
    report_optional("Detection models", &models, "venv/bin/python download_models.py");

    print_step("Writing configuration...");
    let store = ConfigStore::new(workspace.config_path());
    if store.synthesize()? {
        print_ok(format!("Created {}", store.path().display()));
    } else {
        print_ok(format!("Kept existing {}", store.path().display()));
    }
    TemplateRegistry::materialize(&workspace.services_dir())?;

    let mut failures = Vec::new();
    let mut service_registered = false;

    if caps.service_manager
        && prompter.confirm("Run Blur360 as a system service (starts at boot)?", false)?
    {
        let result = super::service::register_app(runner, caps, setup, &workspace, true).await;
        service_registered = result.is_ok();
        contain(result, &mut failures)?;
    }

    if prompter.confirm("Set up a Cloudflare tunnel for remote access?", false)? {
        let result = super::tunnel::provision(runner, caps, setup, &workspace, prompter).await;
        contain(result, &mut failures)?;
    }

    let service = service_registered.then_some(setup.app_unit.as_str());
    print_summary(&store, &workspace.root, service, started)?;

    match failures.into_iter().next() {
        Some(first) => Err(first),
        None => Ok(()),
    }
}

/// A step failure ends its optional sub-flow but not the install.
fn contain(result: Result<()>, failures: &mut Vec<SetupError>) -> Result<()> {
    match result {
        Err(e @ SetupError::StepFailure { .. }) => {
            println!("  {} {}", style("✕").red().bold(), e);
            println!("    {}", style("Continuing with the remaining steps.").dim());
            failures.push(e);
            Ok(())
        }
        other => other,
    }
}

fn report_optional(name: &str, outcome: &OptionalOutcome, retry: &str) {
    if outcome.is_degraded() {
        print_warn(format!("{} unavailable; continuing without it", name));
        println!("    {}", style(format!("Retry later: {}", retry)).dim());
    } else if *outcome == OptionalOutcome::Skipped {
        println!("  {} {} skipped", style("-").dim(), name);
    } else {
        print_ok(format!("{} {}", name, outcome));
    }
}

fn print_summary(
    store: &ConfigStore,
    root: &Path,
    service: Option<&str>,
    started: Instant,
) -> Result<()> {
    let settings = store.load()?.settings();

    println!();
    print_ok(style("Blur360 installed").white().bold());
    println!();
    println!("  {}      {}", style("Location").dim(), root.display());
    println!(
        "  {}           {}",
        style("URL").dim(),
        style(format!("http://{}:{}", settings.server.host, settings.server.port)).cyan()
    );
    if let (true, Some(hostname)) = (settings.cloudflare.enabled, &settings.cloudflare.hostname) {
        println!(
            "  {}        {}",
            style("Public").dim(),
            style(format!("https://{}", hostname)).cyan()
        );
    }
    println!(
        "  {}          {}",
        style("Took").dim(),
        format_duration(started.elapsed().as_secs() as i64)
    );
    println!();
    if let Some(unit) = service {
        println!(
            "  {}",
            style(format!("Running as a service; logs: sudo journalctl -u {} -f", unit)).dim()
        );
    } else {
        println!(
            "  {}  cd {} && venv/bin/python blur360_webapp.py",
            style("Start").dim(),
            root.display()
        );
    }
    println!();
    Ok(())
}
