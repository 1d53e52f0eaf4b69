//! Versioned templates for the generated service units and tunnel document.
//!
//! Templates are embedded in the binary and materialized into the workspace
//! `services/` directory, where an operator may adjust them. Rendering prefers
//! the workspace copy and fails if any placeholder is left unresolved.

use std::path::{Path, PathBuf};

use regex_lite::Regex;
use tera::{Context, Tera};

use crate::error::{Result, SetupError};

pub const TEMPLATE_VERSION: u32 = 2;

const VERSION_PREFIX: &str = "# template-version:";

const APP_UNIT_TEMPLATE: &str = r#"# template-version: 2
[Unit]
Description=Blur360 video anonymisation web app
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
User={{ user }}
WorkingDirectory={{ install_dir }}
ExecStart="{{ exec_path }}" "{{ install_dir }}/blur360_webapp.py"
Restart={{ restart }}
RestartSec=5
Environment=PYTHONUNBUFFERED=1

[Install]
WantedBy=multi-user.target
"#;

const TUNNEL_UNIT_TEMPLATE: &str = r#"# template-version: 2
[Unit]
Description=Blur360 Cloudflare tunnel
After=network-online.target {{ app_unit }}.service
Wants=network-online.target

[Service]
Type=simple
User={{ user }}
WorkingDirectory={{ install_dir }}
ExecStart="{{ exec_path }}" tunnel --no-autoupdate --config "{{ install_dir }}/cloudflared/config.yml" run
Restart={{ restart }}
RestartSec=5

[Install]
WantedBy=multi-user.target
"#;

const TUNNEL_CONFIG_TEMPLATE: &str = r#"# template-version: 2
tunnel: "{{ token }}"
credentials-file: "{{ credentials_file }}"
logfile: "{{ log_file }}"

ingress:
  - hostname: "{{ hostname }}"
    service: "http://localhost:{{ port }}"
  - service: "http_status:404"
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    AppUnit,
    TunnelUnit,
    TunnelConfig,
}

impl TemplateId {
    pub const ALL: [TemplateId; 3] = [Self::AppUnit, Self::TunnelUnit, Self::TunnelConfig];

    /// File name of the materialized copy under `services/`.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::AppUnit => "blur360.service.tmpl",
            Self::TunnelUnit => "blur360-tunnel.service.tmpl",
            Self::TunnelConfig => "cloudflared-config.yml.tmpl",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            Self::AppUnit => APP_UNIT_TEMPLATE,
            Self::TunnelUnit => TUNNEL_UNIT_TEMPLATE,
            Self::TunnelConfig => TUNNEL_CONFIG_TEMPLATE,
        }
    }
}

pub struct TemplateRegistry {
    tera: Tera,
}

impl TemplateRegistry {
    pub fn builtin() -> Result<Self> {
        let mut tera = Tera::default();
        for id in TemplateId::ALL {
            tera.add_raw_template(id.file_name(), id.builtin())?;
        }
        Ok(Self { tera })
    }

    /// Builtin templates, replaced by workspace copies that are current.
    pub fn for_workspace(services_dir: &Path) -> Result<Self> {
        let mut registry = Self::builtin()?;
        for id in TemplateId::ALL {
            let path = services_dir.join(id.file_name());
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            if template_version(&content) == Some(TEMPLATE_VERSION) {
                tracing::debug!("Using workspace template {}", path.display());
                registry.tera.add_raw_template(id.file_name(), &content)?;
            } else {
                tracing::warn!(
                    "Ignoring {} (expected template version {})",
                    path.display(),
                    TEMPLATE_VERSION
                );
            }
        }
        Ok(registry)
    }

    /// Write builtin templates into `dir`, replacing copies from older versions.
    pub fn materialize(dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        for id in TemplateId::ALL {
            let path = dir.join(id.file_name());
            let current = std::fs::read_to_string(&path)
                .ok()
                .and_then(|c| template_version(&c));
            if current.is_some_and(|v| v >= TEMPLATE_VERSION) {
                continue;
            }
            std::fs::write(&path, id.builtin())?;
            written.push(path);
        }

        Ok(written)
    }

    pub fn render(&self, id: TemplateId, context: &Context) -> Result<String> {
        let rendered = self.tera.render(id.file_name(), context)?;
        check_unresolved(&rendered)?;
        Ok(rendered)
    }
}

fn template_version(content: &str) -> Option<u32> {
    content
        .lines()
        .next()?
        .strip_prefix(VERSION_PREFIX)?
        .trim()
        .parse()
        .ok()
}

/// Reject output that still carries template syntax or legacy `__NAME__` markers.
pub fn check_unresolved(rendered: &str) -> Result<()> {
    let pattern = Regex::new(r"\{\{[^}]*\}\}|\{%|__[A-Z][A-Z_]*__")
        .map_err(|e| SetupError::Other(anyhow::anyhow!(e)))?;
    if let Some(m) = pattern.find(rendered) {
        return Err(SetupError::Config(format!(
            "Rendered template still contains placeholder '{}'",
            m.as_str()
        )));
    }
    Ok(())
}
