//! Environment probing.
//!
//! Detects what the host offers before anything is mutated: the Python
//! runtime, OS family, package manager, service manager and privilege level.

use std::fmt;
use std::path::Path;

use crate::config::parse_version;
use crate::error::{Result, SetupError};
use crate::runner::{is_root, CommandRunner, CommandSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsFamily {
    Debian,
    RedHat,
    MacOs,
    /// A Linux distribution outside the Debian and Red Hat families.
    OtherLinux(String),
    Unsupported(String),
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debian => write!(f, "Debian/Ubuntu"),
            Self::RedHat => write!(f, "Red Hat/Fedora"),
            Self::MacOs => write!(f, "macOS"),
            Self::OtherLinux(id) => write!(f, "Linux ({})", id),
            Self::Unsupported(os) => write!(f, "{}", os),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Brew,
}

impl PackageManager {
    pub fn program(&self) -> &'static str {
        match self {
            Self::Apt => "apt-get",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
            Self::Brew => "brew",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Root,
    Sudo,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonRuntime {
    pub program: String,
    pub version: (u32, u32),
    pub raw: String,
}

/// What later stages may rely on.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub python: Option<PythonRuntime>,
    pub os: OsFamily,
    pub arch: String,
    pub package_manager: Option<PackageManager>,
    pub service_manager: bool,
    pub privilege: Privilege,
    pub git: bool,
    pub tunnel_client: bool,
}

impl Capabilities {
    pub fn can_elevate(&self) -> bool {
        self.privilege != Privilege::None
    }

    /// The Python runtime, or a fatal precondition naming how to get one.
    pub fn require_python(&self, min: (u32, u32)) -> Result<&PythonRuntime> {
        let hint = match self.package_manager {
            Some(PackageManager::Apt) => "sudo apt-get install python3 python3-venv python3-pip",
            Some(PackageManager::Dnf) => "sudo dnf install python3 python3-pip",
            Some(PackageManager::Yum) => "sudo yum install python3 python3-pip",
            Some(PackageManager::Brew) => "brew install python",
            None => "Install Python 3 from https://www.python.org/downloads/",
        };

        match &self.python {
            None => Err(SetupError::fatal_with_hint(
                "Python 3 was not found on PATH",
                hint,
            )),
            Some(py) if py.version < min => Err(SetupError::fatal_with_hint(
                format!(
                    "Python {}.{} is too old; {}.{} or newer is required",
                    py.version.0, py.version.1, min.0, min.1
                ),
                hint,
            )),
            Some(py) => Ok(py),
        }
    }
}

pub async fn probe(runner: &dyn CommandRunner, python: &str) -> Result<Capabilities> {
    let os = detect_os();
    let python = probe_python(runner, python).await?;

    let package_manager = detect_package_manager(&os, |name| runner.has_program(name));

    let service_manager =
        runner.has_program("systemctl") && Path::new("/run/systemd/system").exists();

    let privilege = if is_root() {
        Privilege::Root
    } else if runner.has_program("sudo") {
        Privilege::Sudo
    } else {
        Privilege::None
    };

    let caps = Capabilities {
        python,
        os,
        arch: std::env::consts::ARCH.to_string(),
        package_manager,
        service_manager,
        privilege,
        git: runner.has_program("git"),
        tunnel_client: runner.has_program("cloudflared"),
    };

    tracing::debug!(?caps, "environment probed");
    Ok(caps)
}

async fn probe_python(runner: &dyn CommandRunner, program: &str) -> Result<Option<PythonRuntime>> {
    let out = runner
        .run(&CommandSpec::new(program).arg("--version"))
        .await?;
    if !out.success {
        return Ok(None);
    }

    // Python 2 and early 3.x print the version on stderr.
    let raw = if out.stdout.trim().is_empty() {
        out.stderr.trim().to_string()
    } else {
        out.stdout.trim().to_string()
    };

    Ok(parse_python_version(&raw).map(|version| PythonRuntime {
        program: program.to_string(),
        version,
        raw,
    }))
}

/// Parse `Python 3.11.4` into `(3, 11)`.
pub fn parse_python_version(output: &str) -> Option<(u32, u32)> {
    let rest = output.trim().strip_prefix("Python")?;
    parse_version(rest.trim())
}

fn detect_os() -> OsFamily {
    if cfg!(target_os = "macos") {
        return OsFamily::MacOs;
    }
    if !cfg!(target_os = "linux") {
        return OsFamily::Unsupported(std::env::consts::OS.to_string());
    }

    match std::fs::read_to_string("/etc/os-release") {
        Ok(content) => parse_os_release(&content),
        Err(_) => OsFamily::OtherLinux("unknown".to_string()),
    }
}

/// Classify a Linux distribution from `/etc/os-release`.
pub fn parse_os_release(content: &str) -> OsFamily {
    let mut id = String::new();
    let mut id_like = String::new();

    for line in content.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').to_lowercase();
            match key.trim() {
                "ID" => id = value,
                "ID_LIKE" => id_like = value,
                _ => {}
            }
        }
    }

    let family: Vec<&str> = std::iter::once(id.as_str())
        .chain(id_like.split_whitespace())
        .collect();

    if family.iter().any(|f| matches!(*f, "debian" | "ubuntu")) {
        OsFamily::Debian
    } else if family
        .iter()
        .any(|f| matches!(*f, "rhel" | "fedora" | "centos" | "rocky" | "almalinux"))
    {
        OsFamily::RedHat
    } else if id.is_empty() {
        OsFamily::OtherLinux("unknown".to_string())
    } else {
        OsFamily::OtherLinux(id)
    }
}

fn detect_package_manager(os: &OsFamily, has: impl Fn(&str) -> bool) -> Option<PackageManager> {
    let candidates: &[PackageManager] = match os {
        OsFamily::Debian => &[PackageManager::Apt, PackageManager::Brew],
        OsFamily::RedHat => &[PackageManager::Dnf, PackageManager::Yum, PackageManager::Brew],
        OsFamily::MacOs => &[PackageManager::Brew],
        OsFamily::OtherLinux(_) => &[PackageManager::Brew],
        OsFamily::Unsupported(_) => &[],
    };

    candidates.iter().copied().find(|pm| has(pm.program()))
}
