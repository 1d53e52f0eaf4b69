use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SetupError};

/// Settings for the installer itself (not the installed application).
///
/// Loaded from `~/.config/blur360-setup/setup.yaml` when it exists; every
/// field has a default so the file is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    pub repo_url: String,
    pub archive_url: String,
    pub default_install_dir: String,
    pub python: String,
    pub min_python: String,
    pub app_unit: String,
    pub tunnel_unit: String,
    pub service_registry_dir: String,
    pub dashboard_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_root: Option<String>,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            repo_url: "https://github.com/blur360/blur360.git".to_string(),
            archive_url: "https://github.com/blur360/blur360/archive/refs/heads/main.zip"
                .to_string(),
            default_install_dir: "~/blur360".to_string(),
            python: "python3".to_string(),
            min_python: "3.8".to_string(),
            app_unit: "blur360".to_string(),
            tunnel_unit: "blur360-tunnel".to_string(),
            service_registry_dir: "/etc/systemd/system".to_string(),
            dashboard_url: "https://one.dash.cloudflare.com/".to_string(),
            backup_root: None,
        }
    }
}

impl SetupConfig {
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| SetupError::Config("Could not resolve home directory".to_string()))?;
        Ok(home.join(".config").join("blur360-setup"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("setup.yaml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&content)
                .map_err(|e| SetupError::Config(format!("Invalid {}: {}", path.display(), e)))?
        } else {
            tracing::debug!("No setup config at {}, using defaults", path.display());
            SetupConfig::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("BLUR360_REPO_URL") {
            self.repo_url = url;
        }
        if let Ok(url) = std::env::var("BLUR360_ARCHIVE_URL") {
            self.archive_url = url;
        }
        if let Ok(python) = std::env::var("BLUR360_PYTHON") {
            self.python = python;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.repo_url.trim().is_empty() && self.archive_url.trim().is_empty() {
            return Err(SetupError::Config(
                "Both repo_url and archive_url are empty; no way to fetch the source".to_string(),
            ));
        }

        if parse_version(&self.min_python).is_none() {
            return Err(SetupError::Config(format!(
                "Invalid min_python '{}'. Use a version like '3.8'",
                self.min_python
            )));
        }

        for (name, unit) in [("app_unit", &self.app_unit), ("tunnel_unit", &self.tunnel_unit)] {
            if unit.is_empty() || unit.contains('/') || unit.contains(char::is_whitespace) {
                return Err(SetupError::Config(format!(
                    "Invalid {} '{}': must be a bare unit name",
                    name, unit
                )));
            }
        }

        Ok(())
    }

    pub fn default_install_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.default_install_dir).as_ref())
    }

    pub fn min_python_version(&self) -> (u32, u32) {
        parse_version(&self.min_python).unwrap_or((3, 8))
    }

    /// Directory under which timestamped backups are created.
    pub fn backup_root(&self) -> Result<PathBuf> {
        match &self.backup_root {
            Some(root) => Ok(PathBuf::from(shellexpand::tilde(root).as_ref())),
            None => dirs::home_dir()
                .ok_or_else(|| SetupError::Config("Could not resolve home directory".to_string())),
        }
    }
}

/// Parse a `major.minor[.patch]` version string, ignoring any suffix.
pub fn parse_version(s: &str) -> Option<(u32, u32)> {
    let mut parts = s.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor_raw = parts.next()?;
    let digits: String = minor_raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    let minor = digits.parse().ok()?;
    Some((major, minor))
}
