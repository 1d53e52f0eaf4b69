//! Installation workspace resolution and layout.

use std::path::{Component, Path, PathBuf};

use console::style;

use crate::error::{Result, SetupError};
use crate::prompt::Prompter;

/// The application's process entry point; its presence marks an installed workspace.
pub const ENTRY_MARKER: &str = "blur360_webapp.py";

pub const VENV_DIR: &str = "venv";
pub const UPLOADS_DIR: &str = "uploads";
pub const PROCESSED_DIR: &str = "processed";
pub const MODELS_DIR: &str = "models";
pub const CONFIG_FILE: &str = "config.ini";
pub const TUNNEL_DIR: &str = "cloudflared";
pub const SERVICES_DIR: &str = "services";
pub const TRANSLATIONS_DIR: &str = "translations";

/// Directory tree holding every artifact of one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationWorkspace {
    pub root: PathBuf,
    pub writable: bool,
}

impl InstallationWorkspace {
    /// Open an existing directory as a workspace without creating anything.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let writable = is_writable(&root);
        Self { root, writable }
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.root.join(VENV_DIR)
    }

    pub fn venv_python(&self) -> PathBuf {
        self.venv_dir().join("bin").join("python")
    }

    pub fn venv_pip(&self) -> PathBuf {
        self.venv_dir().join("bin").join("pip")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join(MODELS_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn tunnel_dir(&self) -> PathBuf {
        self.root.join(TUNNEL_DIR)
    }

    pub fn tunnel_config_path(&self) -> PathBuf {
        self.tunnel_dir().join("config.yml")
    }

    pub fn tunnel_log_path(&self) -> PathBuf {
        self.tunnel_dir().join("cloudflared.log")
    }

    pub fn services_dir(&self) -> PathBuf {
        self.root.join(SERVICES_DIR)
    }

    pub fn translations_dir(&self) -> PathBuf {
        self.root.join(TRANSLATIONS_DIR)
    }

    pub fn entry_point(&self) -> PathBuf {
        self.root.join(ENTRY_MARKER)
    }

    pub fn has_entry_marker(&self) -> bool {
        self.entry_point().is_file()
    }

    /// Create the declared subtrees. Existing directories are left alone.
    pub fn create_layout(&self) -> Result<()> {
        for dir in [
            self.uploads_dir(),
            self.processed_dir(),
            self.models_dir(),
            self.tunnel_dir(),
            self.services_dir(),
            self.translations_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                SetupError::Workspace(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// Make the workspace the process working directory.
    pub fn enter(&self) -> Result<()> {
        std::env::set_current_dir(&self.root).map_err(|e| {
            SetupError::Workspace(format!("Cannot enter {}: {}", self.root.display(), e))
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(std::fs::read_dir(&self.root)?.next().is_none())
    }
}

/// Outcome of evaluating one answer to the install-directory prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetDecision {
    Use(PathBuf),
    Reprompt(String),
}

/// Expand `~`, resolve against `cwd` and normalize. Empty input selects `default`.
pub fn absolutize(input: &str, default: &Path, cwd: &Path) -> PathBuf {
    let input = input.trim();
    let candidate = if input.is_empty() {
        default.to_path_buf()
    } else {
        PathBuf::from(shellexpand::tilde(input).as_ref())
    };

    if candidate.is_absolute() {
        normalize(&candidate)
    } else {
        normalize(&cwd.join(candidate))
    }
}

/// Turn user input into an absolute target, or explain why it cannot be used.
///
/// Empty input selects `default`. Relative paths are resolved against `cwd`.
/// The nearest existing ancestor must be writable.
pub fn evaluate_target(
    input: &str,
    default: &Path,
    cwd: &Path,
    writable: impl Fn(&Path) -> bool,
) -> TargetDecision {
    let absolute = absolutize(input, default, cwd);

    let Some(ancestor) = nearest_existing(&absolute) else {
        return TargetDecision::Reprompt(format!(
            "No existing parent directory for {}",
            absolute.display()
        ));
    };

    if !ancestor.is_dir() {
        return TargetDecision::Reprompt(format!(
            "{} is not a directory",
            ancestor.display()
        ));
    }

    if !writable(&ancestor) {
        return TargetDecision::Reprompt(format!(
            "No write permission in {}",
            ancestor.display()
        ));
    }

    TargetDecision::Use(absolute)
}

/// Ask for the install directory, create it and switch into it.
///
/// Unwritable targets are re-prompted. If creation still fails the current
/// directory is used instead, with a warning.
pub fn resolve_workspace(
    prompter: &mut dyn Prompter,
    default: &Path,
) -> Result<InstallationWorkspace> {
    let cwd = std::env::current_dir()?;
    let default_display = default.display().to_string();

    let target = loop {
        let answer = prompter.input("Installation directory", Some(default_display.as_str()))?;
        match evaluate_target(&answer, default, &cwd, is_writable) {
            TargetDecision::Use(path) => break path,
            TargetDecision::Reprompt(reason) => {
                println!("  {} {}", style("!").yellow().bold(), reason);
                println!("    {}", style("Choose another location.").dim());
            }
        }
    };

    let workspace = place_workspace(&target, &cwd, |dir| std::fs::create_dir_all(dir));
    workspace.enter()?;
    tracing::info!("Workspace: {}", workspace.root.display());
    Ok(workspace)
}

/// Create `target` with `create`, or fall back to `cwd` with a warning when that fails.
pub fn place_workspace(
    target: &Path,
    cwd: &Path,
    create: impl FnOnce(&Path) -> std::io::Result<()>,
) -> InstallationWorkspace {
    match create(target) {
        Ok(()) => InstallationWorkspace::open(target),
        Err(e) => {
            tracing::warn!("Failed to create {}: {}", target.display(), e);
            println!(
                "  {} Could not create {} ({}); installing into {}",
                style("!").yellow().bold(),
                target.display(),
                e,
                cwd.display()
            );
            InstallationWorkspace::open(cwd)
        }
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors().find(|p| p.exists()).map(Path::to_path_buf)
}

#[cfg(unix)]
pub fn is_writable(path: &Path) -> bool {
    use nix::unistd::{access, AccessFlags};
    access(path, AccessFlags::W_OK).is_ok()
}

#[cfg(not(unix))]
pub fn is_writable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}
