//! systemd service registration, shared by the app unit and the tunnel unit.

use std::fmt;
use std::path::{Path, PathBuf};

use console::style;
use tera::Context;

use crate::error::{Result, SetupError};
use crate::probe::Capabilities;
use crate::runner::{CommandRunner, CommandSpec};
use crate::templates::{TemplateId, TemplateRegistry};
use crate::workspace::InstallationWorkspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    OnFailure,
    Always,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnFailure => "on-failure",
            Self::Always => "always",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub unit_name: String,
    pub template: TemplateId,
    pub exec_path: PathBuf,
    pub working_dir: PathBuf,
    pub user: String,
    pub restart: RestartPolicy,
    /// Extra template variables beyond path, user and restart policy.
    pub extra: Vec<(String, String)>,
}

impl ServiceDefinition {
    /// The web application unit, running the entry point from the venv.
    pub fn app(unit_name: &str, workspace: &InstallationWorkspace, user: &str) -> Self {
        Self {
            unit_name: unit_name.to_string(),
            template: TemplateId::AppUnit,
            exec_path: workspace.venv_python(),
            working_dir: workspace.root.clone(),
            user: user.to_string(),
            restart: RestartPolicy::OnFailure,
            extra: Vec::new(),
        }
    }

    /// The tunnel client unit, started after the app unit.
    pub fn tunnel(
        unit_name: &str,
        app_unit: &str,
        workspace: &InstallationWorkspace,
        user: &str,
        cloudflared: &Path,
    ) -> Self {
        Self {
            unit_name: unit_name.to_string(),
            template: TemplateId::TunnelUnit,
            exec_path: cloudflared.to_path_buf(),
            working_dir: workspace.root.clone(),
            user: user.to_string(),
            restart: RestartPolicy::Always,
            extra: vec![("app_unit".to_string(), app_unit.to_string())],
        }
    }

    pub fn unit_file_name(&self) -> String {
        format!("{}.service", self.unit_name)
    }

    fn context(&self) -> Context {
        let mut ctx = Context::new();
        ctx.insert("install_dir", &self.working_dir.to_string_lossy());
        ctx.insert("exec_path", &self.exec_path.to_string_lossy());
        ctx.insert("user", &self.user);
        ctx.insert("restart", self.restart.as_str());
        for (key, value) in &self.extra {
            ctx.insert(key.as_str(), value);
        }
        ctx
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStep {
    Copy,
    Reload,
    Enable,
    Start,
}

impl fmt::Display for RegistrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "install unit file"),
            Self::Reload => write!(f, "systemctl daemon-reload"),
            Self::Enable => write!(f, "systemctl enable"),
            Self::Start => write!(f, "systemctl start"),
        }
    }
}

pub struct ServiceRegistrar<'a> {
    runner: &'a dyn CommandRunner,
    caps: &'a Capabilities,
    registry_dir: PathBuf,
}

impl<'a> ServiceRegistrar<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        caps: &'a Capabilities,
        registry_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            caps,
            registry_dir: registry_dir.into(),
        }
    }

    pub fn unit_path(&self, unit_name: &str) -> PathBuf {
        self.registry_dir.join(format!("{}.service", unit_name))
    }

    /// Service manager presence and privilege, checked before any mutation.
    pub fn check_preconditions(&self) -> Result<()> {
        if !self.caps.service_manager {
            return Err(SetupError::fatal_with_hint(
                "systemd was not detected; service registration is only supported on systemd hosts",
                "Start the app manually with: venv/bin/python blur360_webapp.py",
            ));
        }
        if !self.caps.can_elevate() {
            return Err(SetupError::fatal_with_hint(
                "Registering a service needs root privileges and sudo is not available",
                "Re-run as root, or install sudo",
            ));
        }
        Ok(())
    }

    pub fn render(&self, def: &ServiceDefinition, templates: &TemplateRegistry) -> Result<String> {
        templates.render(def.template, &def.context())
    }

    /// Render, install, reload, enable and optionally start a unit.
    ///
    /// Each step checks its own exit status and the sequence stops at the
    /// first failure; steps that already succeeded stay applied. Returns the
    /// completed steps.
    pub async fn register(
        &self,
        def: &ServiceDefinition,
        templates: &TemplateRegistry,
        staging_dir: &Path,
        start: bool,
    ) -> Result<Vec<RegistrationStep>> {
        self.check_preconditions()?;

        let rendered = self.render(def, templates)?;
        std::fs::create_dir_all(staging_dir)?;
        let staged = staging_dir.join(def.unit_file_name());
        std::fs::write(&staged, rendered)?;

        let unit = def.unit_file_name();
        let target = self.unit_path(&def.unit_name);
        let inspect = format!("sudo systemctl status {} ; sudo journalctl -u {} -n 50", unit, unit);

        let mut steps = vec![
            (
                RegistrationStep::Copy,
                CommandSpec::new("cp")
                    .arg(staged.to_string_lossy())
                    .arg(target.to_string_lossy())
                    .elevated(),
                format!("ls -l {}", self.registry_dir.display()),
            ),
            (
                RegistrationStep::Reload,
                CommandSpec::new("systemctl").arg("daemon-reload").elevated(),
                "sudo systemctl daemon-reload".to_string(),
            ),
            (
                RegistrationStep::Enable,
                CommandSpec::new("systemctl").args(["enable", unit.as_str()]).elevated(),
                inspect.clone(),
            ),
        ];
        if start {
            steps.push((
                RegistrationStep::Start,
                CommandSpec::new("systemctl").args(["start", unit.as_str()]).elevated(),
                inspect,
            ));
        }

        let mut completed = Vec::new();
        for (step, spec, inspect) in steps {
            let out = self.runner.run(&spec).await?;
            if !out.success {
                println!(
                    "  {} {} failed for {}",
                    style("✕").red().bold(),
                    step,
                    style(&unit).cyan()
                );
                return Err(SetupError::StepFailure {
                    step: format!("{} ({})", step, unit),
                    message: out.failure_summary(),
                    inspect: Some(inspect),
                });
            }
            tracing::debug!("{} done for {}", step, unit);
            completed.push(step);
        }

        Ok(completed)
    }

    /// Stop, disable and delete a registered unit. Missing units are skipped.
    ///
    /// Stop and disable failures are logged; removing the unit file must succeed.
    pub async fn unregister(&self, unit_name: &str) -> Result<bool> {
        let path = self.unit_path(unit_name);
        if !path.exists() {
            return Ok(false);
        }

        let unit = format!("{}.service", unit_name);
        for action in ["stop", "disable"] {
            let out = self
                .runner
                .run(&CommandSpec::new("systemctl").args([action, unit.as_str()]).elevated())
                .await?;
            if !out.success {
                tracing::warn!("systemctl {} {}: {}", action, unit, out.failure_summary());
            }
        }

        self.runner
            .run(
                &CommandSpec::new("rm")
                    .arg("-f")
                    .arg(path.to_string_lossy())
                    .elevated(),
            )
            .await?
            .require_success(&format!("remove {}", unit))
            .map_err(|e| e.with_inspect(format!("ls -l {}", path.display())))?;

        Ok(true)
    }

    pub async fn reload(&self) -> Result<()> {
        self.runner
            .run(&CommandSpec::new("systemctl").arg("daemon-reload").elevated())
            .await?
            .require_success("systemctl daemon-reload")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{OsFamily, PackageManager, Privilege};
    use crate::runner::testing::RecordingRunner;

    fn caps(service_manager: bool, privilege: Privilege) -> Capabilities {
        Capabilities {
            python: None,
            os: OsFamily::Debian,
            arch: "x86_64".to_string(),
            package_manager: Some(PackageManager::Apt),
            service_manager,
            privilege,
            git: true,
            tunnel_client: false,
        }
    }

    fn workspace(root: &str) -> InstallationWorkspace {
        InstallationWorkspace {
            root: PathBuf::from(root),
            writable: true,
        }
    }

    #[test]
    fn test_render_app_unit_has_no_placeholders() {
        let runner = RecordingRunner::new();
        let caps = caps(true, Privilege::Sudo);
        let registrar = ServiceRegistrar::new(&runner, &caps, "/etc/systemd/system");
        let templates = TemplateRegistry::builtin().unwrap();

        let def = ServiceDefinition::app("blur360", &workspace("/opt/app"), "svc");
        let unit = registrar.render(&def, &templates).unwrap();

        assert!(!unit.contains("{{") && !unit.contains("}}"));
        assert!(unit.contains("User=svc\n"));
        assert!(unit.contains("WorkingDirectory=/opt/app\n"));
        assert!(unit.contains("Restart=on-failure\n"));
    }

    #[test]
    fn test_render_quotes_paths_with_spaces() {
        let runner = RecordingRunner::new();
        let caps = caps(true, Privilege::Sudo);
        let registrar = ServiceRegistrar::new(&runner, &caps, "/etc/systemd/system");
        let templates = TemplateRegistry::builtin().unwrap();
        let ws = workspace("/home/svc/my apps/blur360");

        let app = registrar
            .render(&ServiceDefinition::app("blur360", &ws, "svc"), &templates)
            .unwrap();
        assert!(app.contains(
            "ExecStart=\"/home/svc/my apps/blur360/venv/bin/python\" \"/home/svc/my apps/blur360/blur360_webapp.py\"\n"
        ));

        let tunnel = registrar
            .render(
                &ServiceDefinition::tunnel(
                    "blur360-tunnel",
                    "blur360",
                    &ws,
                    "svc",
                    Path::new("/opt/cf tools/cloudflared"),
                ),
                &templates,
            )
            .unwrap();
        assert!(tunnel.contains(
            "ExecStart=\"/opt/cf tools/cloudflared\" tunnel --no-autoupdate --config \"/home/svc/my apps/blur360/cloudflared/config.yml\" run"
        ));
    }

    #[test]
    fn test_render_tunnel_unit() {
        let runner = RecordingRunner::new();
        let caps = caps(true, Privilege::Root);
        let registrar = ServiceRegistrar::new(&runner, &caps, "/etc/systemd/system");
        let templates = TemplateRegistry::builtin().unwrap();

        let def = ServiceDefinition::tunnel(
            "blur360-tunnel",
            "blur360",
            &workspace("/opt/app"),
            "svc",
            Path::new("/usr/bin/cloudflared"),
        );
        let unit = registrar.render(&def, &templates).unwrap();
        assert!(unit.contains("After=network-online.target blur360.service"));
        assert!(unit.contains(
            "ExecStart=\"/usr/bin/cloudflared\" tunnel --no-autoupdate --config \"/opt/app/cloudflared/config.yml\" run"
        ));
        assert!(unit.contains("Restart=always"));
    }

    #[tokio::test]
    async fn test_register_runs_steps_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let caps = caps(true, Privilege::Sudo);
        let registrar = ServiceRegistrar::new(&runner, &caps, tmp.path().join("registry"));
        let templates = TemplateRegistry::builtin().unwrap();
        let def = ServiceDefinition::app("blur360", &workspace("/opt/app"), "svc");

        let steps = registrar
            .register(&def, &templates, &tmp.path().join("services"), true)
            .await
            .unwrap();

        assert_eq!(
            steps,
            vec![
                RegistrationStep::Copy,
                RegistrationStep::Reload,
                RegistrationStep::Enable,
                RegistrationStep::Start
            ]
        );
        let calls = runner.calls();
        assert!(calls[0].starts_with("sudo cp"));
        assert_eq!(calls[1], "sudo systemctl daemon-reload");
        assert_eq!(calls[2], "sudo systemctl enable blur360.service");
        assert_eq!(calls[3], "sudo systemctl start blur360.service");
        assert!(tmp.path().join("services/blur360.service").is_file());
    }

    #[tokio::test]
    async fn test_register_without_start() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let caps = caps(true, Privilege::Sudo);
        let registrar = ServiceRegistrar::new(&runner, &caps, tmp.path());
        let templates = TemplateRegistry::builtin().unwrap();
        let def = ServiceDefinition::app("blur360", &workspace("/opt/app"), "svc");

        let steps = registrar
            .register(&def, &templates, tmp.path(), false)
            .await
            .unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(runner.count("systemctl start"), 0);
    }

    #[tokio::test]
    async fn test_register_stops_at_first_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().fail_on("systemctl enable");
        let caps = caps(true, Privilege::Sudo);
        let registrar = ServiceRegistrar::new(&runner, &caps, tmp.path());
        let templates = TemplateRegistry::builtin().unwrap();
        let def = ServiceDefinition::app("blur360", &workspace("/opt/app"), "svc");

        let err = registrar
            .register(&def, &templates, tmp.path(), true)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("systemctl enable"));
        assert!(err.follow_up().unwrap().contains("systemctl status blur360.service"));
        assert_eq!(runner.count("systemctl start"), 0);
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_register_requires_service_manager() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let caps = caps(false, Privilege::Sudo);
        let registrar = ServiceRegistrar::new(&runner, &caps, tmp.path());
        let templates = TemplateRegistry::builtin().unwrap();
        let def = ServiceDefinition::app("blur360", &workspace("/opt/app"), "svc");

        let err = registrar
            .register(&def, &templates, tmp.path(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::FatalPrecondition { .. }));
        assert!(runner.calls().is_empty());
        assert!(!tmp.path().join("blur360.service").exists());
    }

    #[tokio::test]
    async fn test_register_requires_privilege() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let caps = caps(true, Privilege::None);
        let registrar = ServiceRegistrar::new(&runner, &caps, tmp.path());
        assert!(registrar.check_preconditions().is_err());
    }

    #[tokio::test]
    async fn test_unregister_missing_unit_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let caps = caps(true, Privilege::Sudo);
        let registrar = ServiceRegistrar::new(&runner, &caps, tmp.path());
        assert!(!registrar.unregister("blur360").await.unwrap());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_tolerates_stop_failure() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("blur360.service"), "[Unit]").unwrap();
        let runner = RecordingRunner::new().fail_on("systemctl stop");
        let caps = caps(true, Privilege::Sudo);
        let registrar = ServiceRegistrar::new(&runner, &caps, tmp.path());

        assert!(registrar.unregister("blur360").await.unwrap());
        let calls = runner.calls();
        assert_eq!(calls[0], "sudo systemctl stop blur360.service");
        assert_eq!(calls[1], "sudo systemctl disable blur360.service");
        assert!(calls[2].starts_with("sudo rm -f"));
    }
}
