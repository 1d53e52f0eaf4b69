//! The cloudflared configuration document.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tera::Context;

use crate::error::{Result, SetupError};
use crate::templates::{TemplateId, TemplateRegistry};

pub const CATCH_ALL_SERVICE: &str = "http_status:404";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelDefinition {
    pub token: String,
    pub hostname: String,
    pub port: u16,
    pub log_file: PathBuf,
    pub credentials_file: PathBuf,
}

impl TunnelDefinition {
    pub fn local_service(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    fn context(&self) -> Context {
        let mut ctx = Context::new();
        ctx.insert("token", &self.token);
        ctx.insert("hostname", &self.hostname);
        ctx.insert("port", &self.port);
        ctx.insert("log_file", &self.log_file.to_string_lossy());
        ctx.insert("credentials_file", &self.credentials_file.to_string_lossy());
        ctx
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelDocument {
    pub tunnel: String,
    #[serde(rename = "credentials-file")]
    pub credentials_file: String,
    pub logfile: String,
    pub ingress: Vec<IngressRule>,
}

impl TunnelDocument {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// The document routes `hostname` to `service` and ends in the catch-all rule.
    pub fn validate(&self, def: &TunnelDefinition) -> Result<()> {
        let last = self
            .ingress
            .last()
            .ok_or_else(|| SetupError::Config("tunnel ingress list is empty".to_string()))?;
        if last.hostname.is_some() || last.service != CATCH_ALL_SERVICE {
            return Err(SetupError::Config(format!(
                "tunnel ingress must end with a '{}' catch-all rule",
                CATCH_ALL_SERVICE
            )));
        }

        let expected = def.local_service();
        let routed = self
            .ingress
            .iter()
            .any(|r| r.hostname.as_deref() == Some(def.hostname.as_str()) && r.service == expected);
        if !routed {
            return Err(SetupError::Config(format!(
                "tunnel ingress does not route {} to {}",
                def.hostname, expected
            )));
        }
        Ok(())
    }
}

/// Render the document for `def` and check the result parses back.
pub fn render(def: &TunnelDefinition, templates: &TemplateRegistry) -> Result<String> {
    let text = templates.render(TemplateId::TunnelConfig, &def.context())?;
    TunnelDocument::parse(&text)?.validate(def)?;
    Ok(text)
}

pub fn write(def: &TunnelDefinition, templates: &TemplateRegistry, path: &Path) -> Result<()> {
    let text = render(def, templates)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(port: u16) -> TunnelDefinition {
        TunnelDefinition {
            token: "tok-123".to_string(),
            hostname: "h.example.com".to_string(),
            port,
            log_file: PathBuf::from("/opt/app/cloudflared/cloudflared.log"),
            credentials_file: PathBuf::from("/home/svc/.cloudflared/credentials.json"),
        }
    }

    #[test]
    fn test_ingress_uses_configured_port() {
        let templates = TemplateRegistry::builtin().unwrap();
        let text = render(&definition(8080), &templates).unwrap();
        let doc = TunnelDocument::parse(&text).unwrap();

        assert_eq!(doc.ingress[0].hostname.as_deref(), Some("h.example.com"));
        assert_eq!(doc.ingress[0].service, "http://localhost:8080");
        assert!(!text.contains("5000"));
        assert_eq!(doc.ingress.last().unwrap().service, CATCH_ALL_SERVICE);
    }

    #[test]
    fn test_document_fields() {
        let templates = TemplateRegistry::builtin().unwrap();
        let doc = TunnelDocument::parse(&render(&definition(5000), &templates).unwrap()).unwrap();
        assert_eq!(doc.tunnel, "tok-123");
        assert_eq!(doc.credentials_file, "/home/svc/.cloudflared/credentials.json");
        assert_eq!(doc.logfile, "/opt/app/cloudflared/cloudflared.log");
    }

    #[test]
    fn test_validate_requires_catch_all_last() {
        let def = definition(5000);
        let doc = TunnelDocument {
            tunnel: def.token.clone(),
            credentials_file: "c".to_string(),
            logfile: "l".to_string(),
            ingress: vec![
                IngressRule {
                    hostname: None,
                    service: CATCH_ALL_SERVICE.to_string(),
                },
                IngressRule {
                    hostname: Some(def.hostname.clone()),
                    service: def.local_service(),
                },
            ],
        };
        assert!(doc.validate(&def).is_err());
    }

    #[test]
    fn test_write_creates_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cloudflared/config.yml");
        let templates = TemplateRegistry::builtin().unwrap();
        write(&definition(5000), &templates, &path).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("h.example.com"));
    }
}
