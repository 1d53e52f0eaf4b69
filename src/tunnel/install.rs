//! Tunnel client installation, one installer per package format.
//!
//! Installers are registered in [`InstallerRegistry`] and selected from the
//! probed capability set, so adding a platform means implementing
//! [`ClientInstaller`] and registering it.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{Result, SetupError};
use crate::probe::{Capabilities, OsFamily, PackageManager};
use crate::runner::{run_with_spinner, CommandRunner, CommandSpec};

pub const CLIENT_BINARY: &str = "cloudflared";

const RELEASE_BASE: &str = "https://github.com/cloudflare/cloudflared/releases/latest/download";

const MANUAL_INSTALL: &str =
    "Install cloudflared manually: https://developers.cloudflare.com/cloudflare-one/connections/connect-networks/downloads/";

#[async_trait]
pub trait ClientInstaller: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, caps: &Capabilities) -> bool;

    async fn install(&self, runner: &dyn CommandRunner, caps: &Capabilities) -> Result<()>;
}

/// Release asset suffix for the host architecture.
fn release_arch(arch: &str) -> Option<&'static str> {
    match arch {
        "x86_64" | "amd64" => Some("amd64"),
        "aarch64" | "arm64" => Some("arm64"),
        "arm" | "armv7" => Some("arm"),
        "x86" | "i686" | "i386" => Some("386"),
        _ => None,
    }
}

/// Download a release package into the temp dir and install it with `installer`.
async fn install_release_package(
    runner: &dyn CommandRunner,
    caps: &Capabilities,
    release_base: &str,
    extension: &str,
    installer: &[&str],
) -> Result<()> {
    let arch = release_arch(&caps.arch).ok_or_else(|| {
        SetupError::fatal_with_hint(
            format!("No cloudflared package is published for {}", caps.arch),
            MANUAL_INSTALL,
        )
    })?;

    let asset = format!("cloudflared-linux-{}.{}", arch, extension);
    let url = format!("{}/{}", release_base.trim_end_matches('/'), asset);
    tracing::info!("Downloading {}", url);

    let response = reqwest::get(&url).await?;
    if !response.status().is_success() {
        return Err(SetupError::step(
            "download cloudflared",
            format!("{} returned {}", url, response.status()),
        )
        .with_inspect(format!("curl -fSLO {}", url)));
    }
    let dest = std::env::temp_dir().join(&asset);
    std::fs::write(&dest, response.bytes().await?)?;

    let (program, args) = installer
        .split_first()
        .ok_or_else(|| SetupError::Other(anyhow::anyhow!("empty installer command")))?;
    let install = CommandSpec::new(*program)
        .args(args.iter().copied())
        .arg(dest.to_string_lossy())
        .elevated();
    let out = run_with_spinner(runner, &install, "Installing cloudflared...").await?;
    let _ = std::fs::remove_file(&dest);
    if !out.success {
        return Err(SetupError::step("install cloudflared", out.failure_summary())
            .with_inspect(install.display()));
    }
    Ok(())
}

pub struct DebInstaller {
    release_base: String,
}

impl DebInstaller {
    pub fn new(release_base: impl Into<String>) -> Self {
        Self {
            release_base: release_base.into(),
        }
    }
}

#[async_trait]
impl ClientInstaller for DebInstaller {
    fn name(&self) -> &'static str {
        "deb"
    }

    fn supports(&self, caps: &Capabilities) -> bool {
        caps.os == OsFamily::Debian
    }

    async fn install(&self, runner: &dyn CommandRunner, caps: &Capabilities) -> Result<()> {
        install_release_package(runner, caps, &self.release_base, "deb", &["dpkg", "-i"]).await
    }
}

pub struct RpmInstaller {
    release_base: String,
}

impl RpmInstaller {
    pub fn new(release_base: impl Into<String>) -> Self {
        Self {
            release_base: release_base.into(),
        }
    }
}

#[async_trait]
impl ClientInstaller for RpmInstaller {
    fn name(&self) -> &'static str {
        "rpm"
    }

    fn supports(&self, caps: &Capabilities) -> bool {
        caps.os == OsFamily::RedHat
    }

    async fn install(&self, runner: &dyn CommandRunner, caps: &Capabilities) -> Result<()> {
        install_release_package(runner, caps, &self.release_base, "rpm", &["rpm", "-Uvh"]).await
    }
}

pub struct BrewInstaller;

#[async_trait]
impl ClientInstaller for BrewInstaller {
    fn name(&self) -> &'static str {
        "brew"
    }

    fn supports(&self, caps: &Capabilities) -> bool {
        caps.package_manager == Some(PackageManager::Brew)
    }

    async fn install(&self, runner: &dyn CommandRunner, _caps: &Capabilities) -> Result<()> {
        let spec = CommandSpec::new("brew").args(["install", CLIENT_BINARY]);
        let out = run_with_spinner(runner, &spec, "Installing cloudflared...").await?;
        if !out.success {
            return Err(SetupError::step("brew install cloudflared", out.failure_summary())
                .with_inspect(spec.display()));
        }
        Ok(())
    }
}

pub struct InstallerRegistry {
    installers: Vec<Box<dyn ClientInstaller>>,
}

impl Default for InstallerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl InstallerRegistry {
    pub fn new() -> Self {
        Self {
            installers: Vec::new(),
        }
    }

    /// Native packages first, Homebrew last.
    pub fn with_defaults() -> Self {
        Self::with_release_base(RELEASE_BASE)
    }

    pub fn with_release_base(release_base: &str) -> Self {
        let mut registry = Self::new();
        registry.register(DebInstaller::new(release_base));
        registry.register(RpmInstaller::new(release_base));
        registry.register(BrewInstaller);
        registry
    }

    pub fn register<I: ClientInstaller + 'static>(&mut self, installer: I) {
        self.installers.push(Box::new(installer));
    }

    /// First installer supporting this host; an unsupported host is fatal.
    pub fn select(&self, caps: &Capabilities) -> Result<&dyn ClientInstaller> {
        self.installers
            .iter()
            .find(|i| i.supports(caps))
            .map(|i| i.as_ref())
            .ok_or_else(|| {
                SetupError::fatal_with_hint(
                    format!("cloudflared cannot be installed automatically on {}", caps.os),
                    MANUAL_INSTALL,
                )
            })
    }
}

/// Install the client unless the probe already found it, then verify it runs.
pub async fn ensure_client(
    runner: &dyn CommandRunner,
    caps: &Capabilities,
    registry: &InstallerRegistry,
) -> Result<bool> {
    if caps.tunnel_client {
        return Ok(false);
    }

    let installer = registry.select(caps)?;
    tracing::info!("Installing cloudflared via {}", installer.name());
    installer.install(runner, caps).await?;

    runner
        .run(&CommandSpec::new(CLIENT_BINARY).arg("--version"))
        .await?
        .require_success("cloudflared --version")
        .map_err(|e| e.with_inspect("which cloudflared"))?;
    Ok(true)
}

/// Absolute path of the installed client, for the service unit.
pub fn client_path() -> PathBuf {
    which::which(CLIENT_BINARY).unwrap_or_else(|_| PathBuf::from("/usr/local/bin/cloudflared"))
}
