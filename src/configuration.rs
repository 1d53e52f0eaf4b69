//! The application's `config.ini`.
//!
//! The file is a fixed template of sections and keys read by the web app, the
//! service unit and the tunnel provisioner. It is held in memory as a list of
//! lines so that untouched lines serialize byte-for-byte; mutation only
//! rewrites existing keys and never appends new ones.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use crate::error::{Result, SetupError};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_LANGUAGE: &str = "da";

const DEFAULT_CONFIG: &str = "\
# Blur360 configuration
# A commented-out key is unset and uses its documented default.

[server]
host = 127.0.0.1
port = 5000
debug = False

[processing]
language = da
verbose_logging = False
# max_workers = 4

[cloudflare]
enabled = False
# token =
# hostname =
";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Section { name: String, raw: String },
    Entry {
        key: String,
        value: String,
        commented: bool,
        raw: String,
    },
    Other(String),
}

impl Line {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if trimmed.starts_with('[') && trimmed.ends_with(']') && trimmed.len() > 2 {
            return Line::Section {
                name: trimmed[1..trimmed.len() - 1].trim().to_string(),
                raw: raw.to_string(),
            };
        }

        let (body, commented) = match trimmed.strip_prefix('#').or_else(|| trimmed.strip_prefix(';')) {
            Some(rest) => (rest.trim(), true),
            None => (trimmed, false),
        };

        match body.split_once('=') {
            Some((key, value)) if is_key(key.trim()) => Line::Entry {
                key: key.trim().to_lowercase(),
                value: value.trim().to_string(),
                commented,
                raw: raw.to_string(),
            },
            _ => Line::Other(raw.to_string()),
        }
    }

    fn raw(&self) -> &str {
        match self {
            Line::Section { raw, .. } | Line::Entry { raw, .. } | Line::Other(raw) => raw,
        }
    }
}

fn is_key(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Result of a [`Configuration::mutate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Updated,
    /// The key already held this value.
    Unchanged,
    /// No such key in the template. Nothing was written.
    Absent,
}

/// Sectioned key/value document with line-preserving edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    lines: Vec<Line>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::parse(DEFAULT_CONFIG)
    }
}

impl Configuration {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.split('\n').map(Line::parse).collect(),
        }
    }

    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(Line::raw)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Index of the line holding `section.key`. Active lines win over commented ones.
    fn locate(&self, section: &str, key: &str) -> Option<usize> {
        let key = key.to_lowercase();
        let mut current: Option<&str> = None;
        let mut commented_match = None;

        for (idx, line) in self.lines.iter().enumerate() {
            match line {
                Line::Section { name, .. } => current = Some(name.as_str()),
                Line::Entry {
                    key: k, commented, ..
                } if current == Some(section) && *k == key => {
                    if !commented {
                        return Some(idx);
                    }
                    commented_match.get_or_insert(idx);
                }
                _ => {}
            }
        }

        commented_match
    }

    /// The value of an active key. Commented or missing keys are `None`.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        match self.locate(section, key).map(|idx| &self.lines[idx]) {
            Some(Line::Entry {
                value,
                commented: false,
                ..
            }) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn read(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key).unwrap_or(default).to_string()
    }

    pub fn read_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get(section, key)
            .and_then(parse_bool)
            .unwrap_or(default)
    }

    pub fn read_port(&self, section: &str, key: &str, default: u16) -> u16 {
        match self.get(section, key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!("Invalid {}.{} '{}', using {}", section, key, raw, default);
                default
            }),
            None => default,
        }
    }

    /// Whether the template declares `section.key`, active or commented.
    pub fn has_key(&self, section: &str, key: &str) -> bool {
        self.locate(section, key).is_some()
    }

    /// Rewrite the value of an existing key in place.
    ///
    /// A commented-out key is activated. A key missing from the template is
    /// reported as [`Mutation::Absent`] and the document is left untouched.
    pub fn mutate(&mut self, section: &str, key: &str, value: &str) -> Result<Mutation> {
        if value.contains('\n') || value.contains('\r') {
            return Err(SetupError::Config(format!(
                "Value for {}.{} must be a single line",
                section, key
            )));
        }

        let Some(idx) = self.locate(section, key) else {
            return Ok(Mutation::Absent);
        };

        let Line::Entry {
            key: k,
            value: v,
            commented,
            raw,
        } = &self.lines[idx]
        else {
            return Ok(Mutation::Absent);
        };

        if !commented && v == value {
            return Ok(Mutation::Unchanged);
        }

        let indent: String = raw.chars().take_while(|c| c.is_whitespace()).collect();
        let new_raw = if value.is_empty() {
            format!("{}{} =", indent, k)
        } else {
            format!("{}{} = {}", indent, k, value)
        };

        let updated = Line::Entry {
            key: k.clone(),
            value: value.to_string(),
            commented: false,
            raw: new_raw,
        };
        self.lines[idx] = updated;
        Ok(Mutation::Updated)
    }

    pub fn settings(&self) -> AppSettings {
        AppSettings {
            server: ServerSettings {
                host: self.read("server", "host", DEFAULT_HOST),
                port: self.read_port("server", "port", DEFAULT_PORT),
                debug: self.read_bool("server", "debug", false),
            },
            processing: ProcessingSettings {
                language: self.read("processing", "language", DEFAULT_LANGUAGE),
                verbose_logging: self.read_bool("processing", "verbose_logging", false),
                max_workers: self
                    .get("processing", "max_workers")
                    .and_then(|v| v.parse().ok()),
            },
            cloudflare: CloudflareSettings {
                enabled: self.read_bool("cloudflare", "enabled", false),
                token: self
                    .get("cloudflare", "token")
                    .filter(|t| !t.is_empty())
                    .map(str::to_string),
                hostname: self
                    .get("cloudflare", "hostname")
                    .filter(|h| !h.is_empty())
                    .map(str::to_string),
            },
        }
    }
}

/// INI boolean spelling accepted by the application.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Render a boolean the way the application writes it.
pub fn format_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Typed view over the configuration with documented defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    pub server: ServerSettings,
    pub processing: ProcessingSettings,
    pub cloudflare: CloudflareSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingSettings {
    pub language: String,
    pub verbose_logging: bool,
    /// Written to the template but only consumed by the application itself.
    pub max_workers: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudflareSettings {
    pub enabled: bool,
    pub token: Option<String>,
    pub hostname: Option<String>,
}

/// On-disk access to a workspace's `config.ini`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write the default document if no artifact exists. Returns `true` when created.
    pub fn synthesize(&self) -> Result<bool> {
        let _lock = self.lock()?;
        if self.path.exists() {
            tracing::debug!("{} exists, keeping it", self.path.display());
            return Ok(false);
        }
        self.replace(&Configuration::default())?;
        tracing::info!("Created default configuration at {}", self.path.display());
        Ok(true)
    }

    pub fn load(&self) -> Result<Configuration> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            SetupError::Config(format!("Cannot read {}: {}", self.path.display(), e))
        })?;
        Ok(Configuration::parse(&text))
    }

    /// Read one scalar, falling back to `default` for commented or missing keys.
    #[cfg(test)]
    pub fn read(&self, section: &str, key: &str, default: &str) -> Result<String> {
        Ok(self.load()?.read(section, key, default))
    }

    /// Mutate a single key and persist only if something changed.
    pub fn mutate(&self, section: &str, key: &str, value: &str) -> Result<Mutation> {
        let mut result = Mutation::Unchanged;
        self.edit(|config| {
            result = config.mutate(section, key, value)?;
            Ok(result == Mutation::Updated)
        })?;
        Ok(result)
    }

    /// Load, apply `f` and save when it reports a change, all under the write lock.
    pub fn edit<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Configuration) -> Result<bool>,
    {
        let _lock = self.lock()?;
        let mut config = self.load()?;
        let changed = f(&mut config)?;
        if changed {
            self.replace(&config)?;
        }
        Ok(changed)
    }

    /// Exclusive OS lock on `config.ini.lock`, released when the file is
    /// dropped or the process exits. A lock file left behind by an
    /// interrupted run does not block anything.
    fn lock(&self) -> Result<File> {
        let path = sibling(&self.path, "lock");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| SetupError::Config(format!("Cannot open {}: {}", path.display(), e)))?;
        tracing::debug!("Waiting for {}", path.display());
        file.lock_exclusive().map_err(|e| {
            SetupError::Config(format!("Cannot lock {}: {}", self.path.display(), e))
        })?;
        Ok(file)
    }

    /// Atomically replace the artifact. Callers hold the lock.
    ///
    /// The new content is staged next to the original; the original is kept
    /// as `.bak` until the staged copy has been renamed over it.
    fn replace(&self, config: &Configuration) -> Result<()> {
        let staged = sibling(&self.path, "tmp");
        let backup = sibling(&self.path, "bak");

        if let Err(e) = std::fs::write(&staged, config.render()) {
            let _ = std::fs::remove_file(&staged);
            return Err(SetupError::Config(format!(
                "Failed to stage {}: {}",
                staged.display(),
                e
            )));
        }

        let had_original = self.path.exists();
        if had_original {
            std::fs::copy(&self.path, &backup)?;
        }

        if let Err(e) = std::fs::rename(&staged, &self.path) {
            let _ = std::fs::remove_file(&staged);
            if had_original {
                let _ = std::fs::remove_file(&backup);
            }
            return Err(SetupError::Config(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }

        if had_original {
            std::fs::remove_file(&backup)?;
        }
        Ok(())
    }
}

pub(crate) fn sibling(path: &Path, ext: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "config.ini".to_string());
    path.with_file_name(format!("{}.{}", name, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ConfigStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().join("config.ini"));
        (tmp, store)
    }

    #[test]
    fn test_defaults() {
        let settings = Configuration::default().settings();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 5000);
        assert!(!settings.server.debug);
        assert_eq!(settings.processing.language, "da");
        assert_eq!(settings.processing.max_workers, None);
        assert!(!settings.cloudflare.enabled);
        assert_eq!(settings.cloudflare.token, None);
        assert_eq!(settings.cloudflare.hostname, None);
    }

    #[test]
    fn test_render_roundtrips_bytes() {
        let text = "[server]\r\nhost=0.0.0.0\n\n; note\n  port =  8080  \n";
        assert_eq!(Configuration::parse(text).render(), text);
    }

    #[test]
    fn test_synthesize_twice_is_idempotent() {
        let (_tmp, store) = store();
        assert!(store.synthesize().unwrap());
        let first = std::fs::read_to_string(store.path()).unwrap();
        assert!(!store.synthesize().unwrap());
        let second = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.matches("[server]").count(), 1);
        assert_eq!(second.matches("host =").count(), 1);
    }

    #[test]
    fn test_synthesize_keeps_existing_artifact() {
        let (_tmp, store) = store();
        std::fs::write(store.path(), "[server]\nport = 9000\n").unwrap();
        assert!(!store.synthesize().unwrap());
        assert_eq!(store.read("server", "port", "5000").unwrap(), "9000");
    }

    #[test]
    fn test_mutate_then_read() {
        let (_tmp, store) = store();
        store.synthesize().unwrap();
        assert_eq!(
            store.mutate("server", "host", "0.0.0.0").unwrap(),
            Mutation::Updated
        );
        assert_eq!(store.read("server", "host", DEFAULT_HOST).unwrap(), "0.0.0.0");
        assert!(!sibling(store.path(), "bak").exists());
        assert!(!sibling(store.path(), "tmp").exists());
    }

    #[test]
    fn test_mutate_absent_key_leaves_file_identical() {
        let (_tmp, store) = store();
        store.synthesize().unwrap();
        let before = std::fs::read(store.path()).unwrap();
        assert_eq!(
            store.mutate("server", "workers", "8").unwrap(),
            Mutation::Absent
        );
        assert_eq!(
            store.mutate("nosuch", "host", "x").unwrap(),
            Mutation::Absent
        );
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn test_mutate_never_appends() {
        let mut config = Configuration::default();
        let before = config.render().lines().count();
        config.mutate("cloudflare", "token", "abc").unwrap();
        config.mutate("cloudflare", "extra", "abc").unwrap();
        assert_eq!(config.render().lines().count(), before);
    }

    #[test]
    fn test_commented_key_reads_as_default() {
        let config = Configuration::default();
        assert_eq!(config.get("cloudflare", "token"), None);
        assert_eq!(config.read("processing", "max_workers", "2"), "2");
        assert!(config.has_key("processing", "max_workers"));
    }

    #[test]
    fn test_mutate_activates_commented_key() {
        let mut config = Configuration::default();
        assert_eq!(
            config.mutate("cloudflare", "hostname", "h.example.com").unwrap(),
            Mutation::Updated
        );
        assert_eq!(config.get("cloudflare", "hostname"), Some("h.example.com"));
        assert!(config.render().contains("\nhostname = h.example.com\n"));
        assert!(!config.render().contains("# hostname"));
    }

    #[test]
    fn test_mutate_is_scoped_to_section() {
        let mut config = Configuration::parse("[a]\nenabled = no\n[b]\nenabled = no\n");
        config.mutate("b", "enabled", "yes").unwrap();
        assert_eq!(config.get("a", "enabled"), Some("no"));
        assert_eq!(config.get("b", "enabled"), Some("yes"));
    }

    #[test]
    fn test_mutate_same_value_is_unchanged() {
        let mut config = Configuration::default();
        assert_eq!(
            config.mutate("server", "port", "5000").unwrap(),
            Mutation::Unchanged
        );
    }

    #[test]
    fn test_mutate_rejects_multiline() {
        let mut config = Configuration::default();
        assert!(config.mutate("server", "host", "a\nb").is_err());
    }

    #[test]
    fn test_active_key_wins_over_commented() {
        let config = Configuration::parse("[server]\n# port = 1\nport = 8080\n");
        assert_eq!(config.settings().server.port, 8080);
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let config = Configuration::parse("[server]\nport = http\n");
        assert_eq!(config.settings().server.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_keys_case_insensitive() {
        let config = Configuration::parse("[server]\nHost = 10.0.0.1\n");
        assert_eq!(config.get("server", "host"), Some("10.0.0.1"));
    }

    #[test]
    fn test_leftover_lock_file_does_not_block_mutate() {
        let (_tmp, store) = store();
        store.synthesize().unwrap();
        std::fs::write(sibling(store.path(), "lock"), "4242\n").unwrap();

        assert_eq!(
            store.mutate("server", "host", "0.0.0.0").unwrap(),
            Mutation::Updated
        );
        assert_eq!(store.read("server", "host", DEFAULT_HOST).unwrap(), "0.0.0.0");
    }

    #[test]
    fn test_edit_saves_only_on_change() {
        let (_tmp, store) = store();
        store.synthesize().unwrap();
        let before = std::fs::metadata(store.path()).unwrap().modified().unwrap();

        assert!(!store.edit(|_| Ok(false)).unwrap());
        assert_eq!(
            std::fs::metadata(store.path()).unwrap().modified().unwrap(),
            before
        );

        let changed = store
            .edit(|config| {
                config.mutate("cloudflare", "enabled", "True")?;
                config.mutate("cloudflare", "hostname", "h.example.com")?;
                Ok(true)
            })
            .unwrap();
        assert!(changed);
        let settings = store.load().unwrap().settings();
        assert!(settings.cloudflare.enabled);
        assert_eq!(settings.cloudflare.hostname.as_deref(), Some("h.example.com"));
    }

    #[test]
    fn test_edit_error_leaves_file() {
        let (_tmp, store) = store();
        store.synthesize().unwrap();
        let before = std::fs::read(store.path()).unwrap();
        let err = store.edit(|config| {
            config.mutate("server", "host", "x")?;
            config.mutate("server", "port", "a\nb")?;
            Ok(true)
        });
        assert!(err.is_err());
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }
}
