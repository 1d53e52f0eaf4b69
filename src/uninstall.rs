//! Removal of an installation.
//!
//! Every destructive action is recorded in a journal so the order of events
//! (backup before removal, leaving the directory before deleting it) can be
//! checked after a run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use console::style;
use serde::{Deserialize, Serialize};

use crate::config::SetupConfig;
use crate::configuration::sibling;
use crate::error::{Outcome, Result, SetupError};
use crate::probe::Capabilities;
use crate::prompt::Prompter;
use crate::runner::CommandRunner;
use crate::service::ServiceRegistrar;
use crate::utils::{copy_recursive, disk_usage, format_bytes, validate_path_within};
use crate::workspace::{
    absolutize, InstallationWorkspace, CONFIG_FILE, MODELS_DIR, PROCESSED_DIR, SERVICES_DIR,
    TRANSLATIONS_DIR, TUNNEL_DIR, UPLOADS_DIR, VENV_DIR,
};

/// Workspace entries removed, in this order.
pub const REMOVAL_ORDER: [&str; 8] = [
    VENV_DIR,
    UPLOADS_DIR,
    PROCESSED_DIR,
    MODELS_DIR,
    CONFIG_FILE,
    TUNNEL_DIR,
    SERVICES_DIR,
    TRANSLATIONS_DIR,
];

/// Top-level source files shipped with the application.
const SOURCE_NAMES: &[&str] = &[
    "requirements.txt",
    "babel.cfg",
    "LICENSE",
    "Dockerfile",
    ".gitignore",
    ".git",
    "static",
    "templates",
    "__pycache__",
];

const SOURCE_EXTENSIONS: &[&str] = &["py", "sh", "md", "txt", "cfg", "bat"];

pub const BACKUP_MANIFEST: &str = "backup.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UninstallEvent {
    UnitRemoved(String),
    RegistryReloaded,
    BackedUp(PathBuf),
    Removed(PathBuf),
    SourceRemoved(PathBuf),
    LeftDirectory(PathBuf),
    DirectoryRemoved(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub journal: Vec<UninstallEvent>,
    pub backup: Option<BackupRecord>,
}

impl UninstallReport {
    fn record(&mut self, event: UninstallEvent) {
        tracing::debug!(?event, "uninstall");
        self.journal.push(event);
    }
}

/// Copy user output and the configuration into a fresh timestamped directory.
///
/// The directory always holds a `backup.json` manifest, even when the
/// workspace had nothing to save.
pub fn create_backup(
    workspace: &InstallationWorkspace,
    backup_root: &Path,
    now: DateTime<Utc>,
) -> Result<BackupRecord> {
    let destination = backup_root.join(format!(
        "blur360_backup_{}",
        now.format("%Y%m%d_%H%M%S")
    ));
    std::fs::create_dir_all(backup_root)?;
    std::fs::create_dir(&destination).map_err(|e| {
        SetupError::Workspace(format!(
            "Cannot create backup directory {}: {}",
            destination.display(),
            e
        ))
    })?;

    let mut sources = Vec::new();
    let mut bytes = 0;
    for source in [workspace.processed_dir(), workspace.config_path()] {
        if !source.exists() {
            continue;
        }
        let Some(name) = source.file_name() else {
            continue;
        };
        bytes += copy_recursive(&source, &destination.join(name))?;
        sources.push(source);
    }

    let record = BackupRecord {
        timestamp: now,
        sources,
        destination,
        bytes,
    };
    std::fs::write(
        record.destination.join(BACKUP_MANIFEST),
        serde_json::to_string_pretty(&record)?,
    )?;
    Ok(record)
}

fn remove_entry(root: &Path, path: &Path) -> Result<bool> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(false);
    };

    if meta.file_type().is_symlink() || !meta.is_dir() {
        std::fs::remove_file(path)?;
        return Ok(true);
    }

    validate_path_within(path, root)
        .map_err(|e| SetupError::Workspace(format!("Refusing to remove {}: {}", path.display(), e)))?;
    std::fs::remove_dir_all(path)?;
    Ok(true)
}

/// Remove the fixed workspace subtrees, returning what existed and was removed.
pub fn remove_subtrees(workspace: &InstallationWorkspace) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for name in REMOVAL_ORDER {
        let path = workspace.root.join(name);
        if remove_entry(&workspace.root, &path)? {
            removed.push(path);
        }
        if name == CONFIG_FILE {
            remove_entry(&workspace.root, &sibling(&workspace.config_path(), "lock"))?;
        }
    }
    Ok(removed)
}

pub fn is_source_entry(name: &str) -> bool {
    if SOURCE_NAMES.contains(&name) {
        return true;
    }
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// Remove top-level application source files matched by name or extension.
pub fn remove_source_files(workspace: &InstallationWorkspace) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&workspace.root)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_str().is_some_and(is_source_entry))
        .map(|e| e.path())
        .collect();
    entries.sort();

    let mut removed = Vec::new();
    for path in entries {
        if remove_entry(&workspace.root, &path)? {
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Remove `dir`, first moving the process out of it if it is the current directory.
///
/// Returns the directory moved to, if a move was needed.
pub fn leave_and_remove(dir: &Path) -> Result<Option<PathBuf>> {
    let target = dir.canonicalize()?;
    let mut left = None;

    let cwd = std::env::current_dir().ok().and_then(|c| c.canonicalize().ok());
    if cwd.is_some_and(|c| c.starts_with(&target)) {
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .or_else(dirs::home_dir)
            .ok_or_else(|| SetupError::Workspace("No directory to move to".to_string()))?;
        std::env::set_current_dir(&parent)?;
        left = Some(parent);
    }

    std::fs::remove_dir(&target)?;
    Ok(left)
}

pub struct Uninstaller<'a> {
    runner: &'a dyn CommandRunner,
    caps: &'a Capabilities,
    setup: &'a SetupConfig,
}

impl<'a> Uninstaller<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        caps: &'a Capabilities,
        setup: &'a SetupConfig,
    ) -> Self {
        Self {
            runner,
            caps,
            setup,
        }
    }

    pub async fn run(
        &self,
        prompter: &mut dyn Prompter,
        default_dir: &Path,
        backup_root: &Path,
    ) -> Result<Outcome<UninstallReport>> {
        let default = default_dir.to_string_lossy().to_string();
        let answer = prompter.input("Installation directory", Some(default.as_str()))?;
        let dir = absolutize(&answer, default_dir, &std::env::current_dir()?);
        if !dir.is_dir() {
            return Err(SetupError::fatal(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let workspace = InstallationWorkspace::open(&dir);

        if !workspace.has_entry_marker() {
            println!(
                "  {} {} does not look like a Blur360 installation (no {})",
                style("!").yellow().bold(),
                dir.display(),
                crate::workspace::ENTRY_MARKER
            );
            if !prompter.confirm("Continue anyway?", false)? {
                return Ok(Outcome::Declined);
            }
        }

        println!();
        println!(
            "  {} This removes the virtual environment, uploads, processed videos,",
            style("!").red().bold()
        );
        println!("    models, config.ini and tunnel configuration in {}", style(dir.display()).white().bold());
        println!();
        if !prompter.confirm("Uninstall Blur360?", false)? {
            return Ok(Outcome::Declined);
        }
        if !prompter.confirm("Are you sure? This cannot be undone", false)? {
            return Ok(Outcome::Declined);
        }

        let mut report = UninstallReport::default();

        self.remove_units(&mut report).await?;

        if prompter.confirm("Back up processed videos and config.ini first?", true)? {
            let record = create_backup(&workspace, backup_root, Utc::now())?;
            println!(
                "  {} Backup ({}) in {}",
                style("✓").green().bold(),
                format_bytes(disk_usage(&record.destination)),
                style(record.destination.display()).cyan()
            );
            report.record(UninstallEvent::BackedUp(record.destination.clone()));
            report.backup = Some(record);
        }

        for path in remove_subtrees(&workspace)? {
            println!("    {} {}", style("→").dim(), path.display());
            report.record(UninstallEvent::Removed(path));
        }

        if prompter.confirm("Also remove the application source files?", false)? {
            for path in remove_source_files(&workspace)? {
                report.record(UninstallEvent::SourceRemoved(path));
            }
        }

        if workspace.is_empty()?
            && prompter.confirm(
                &format!("Remove the empty directory {}?", dir.display()),
                true,
            )?
        {
            if let Some(moved_to) = leave_and_remove(&dir)? {
                report.record(UninstallEvent::LeftDirectory(moved_to));
            }
            report.record(UninstallEvent::DirectoryRemoved(dir.clone()));
        }

        println!();
        println!("  {} Blur360 uninstalled", style("✓").green().bold());
        Ok(Outcome::Done(report))
    }

    async fn remove_units(&self, report: &mut UninstallReport) -> Result<()> {
        if !self.caps.service_manager {
            return Ok(());
        }

        let registrar =
            ServiceRegistrar::new(self.runner, self.caps, &self.setup.service_registry_dir);
        let units = [&self.setup.app_unit, &self.setup.tunnel_unit];
        if !units.iter().any(|u| registrar.unit_path(u).exists()) {
            return Ok(());
        }
        if !self.caps.can_elevate() {
            println!(
                "  {} Service units are installed but root privileges are unavailable; remove them with:",
                style("!").yellow().bold()
            );
            for unit in units {
                println!("    sudo systemctl disable --now {}.service", unit);
            }
            return Ok(());
        }

        let mut removed_any = false;
        for unit in units {
            if registrar.unregister(unit).await? {
                println!("  {} Removed {}.service", style("✓").green().bold(), unit);
                report.record(UninstallEvent::UnitRemoved(unit.to_string()));
                removed_any = true;
            }
        }
        if removed_any {
            registrar.reload().await?;
            report.record(UninstallEvent::RegistryReloaded);
        }
        Ok(())
    }
}
