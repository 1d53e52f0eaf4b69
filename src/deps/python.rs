//! Isolated Python runtime and package installation.

use crate::error::{Result, SetupError};
use crate::probe::PythonRuntime;
use crate::runner::{run_with_spinner, CommandRunner, CommandSpec};
use crate::workspace::InstallationWorkspace;

use super::OptionalOutcome;

pub const REQUIREMENTS_FILE: &str = "requirements.txt";
pub const MODEL_SCRIPT: &str = "download_models.py";

/// Package and import name of the enhanced detector.
pub const ENHANCED_PACKAGE: &str = "ultralytics";

pub struct PythonEnv<'a> {
    runner: &'a dyn CommandRunner,
    workspace: &'a InstallationWorkspace,
}

impl<'a> PythonEnv<'a> {
    pub fn new(runner: &'a dyn CommandRunner, workspace: &'a InstallationWorkspace) -> Self {
        Self { runner, workspace }
    }

    fn venv_python(&self) -> String {
        self.workspace.venv_python().to_string_lossy().to_string()
    }

    fn venv_pip(&self) -> String {
        self.workspace.venv_pip().to_string_lossy().to_string()
    }

    /// Build `venv/` with the system interpreter unless it already exists.
    pub async fn create_venv(&self, python: &PythonRuntime) -> Result<bool> {
        if self.workspace.venv_python().exists() {
            tracing::info!("Virtual environment already present");
            return Ok(false);
        }

        let spec = CommandSpec::new(&python.program)
            .args(["-m", "venv"])
            .arg(self.workspace.venv_dir().to_string_lossy())
            .cwd(&self.workspace.root);

        let out = run_with_spinner(self.runner, &spec, "Creating virtual environment...").await?;
        if !out.success {
            return Err(SetupError::step("virtual environment", out.failure_summary())
                .with_inspect(format!(
                    "{} (on Debian/Ubuntu install python3-venv first)",
                    spec.display()
                )));
        }
        Ok(true)
    }

    /// Install the mandatory manifest. Any failure is fatal to the install.
    pub async fn install_requirements(&self) -> Result<()> {
        let manifest = self.workspace.root.join(REQUIREMENTS_FILE);
        if !manifest.is_file() {
            return Err(SetupError::step(
                "pip install",
                format!("{} not found in the application source", manifest.display()),
            ));
        }

        let upgrade = CommandSpec::new(self.venv_pip())
            .args(["install", "--upgrade", "pip"])
            .cwd(&self.workspace.root);
        let out = run_with_spinner(self.runner, &upgrade, "Upgrading pip...").await?;
        if !out.success {
            tracing::warn!("pip self-upgrade failed: {}", out.failure_summary());
        }

        let install = CommandSpec::new(self.venv_pip())
            .args(["install", "-r", REQUIREMENTS_FILE])
            .cwd(&self.workspace.root);
        let out = run_with_spinner(self.runner, &install, "Installing dependencies...").await?;
        if !out.success {
            return Err(SetupError::step("pip install", out.failure_summary())
                .with_inspect(format!("cd {} && {}", self.workspace.root.display(), install.display())));
        }
        Ok(())
    }

    pub async fn is_importable(&self, module: &str) -> Result<bool> {
        let spec = CommandSpec::new(self.venv_python())
            .arg("-c")
            .arg(format!("import {}", module))
            .cwd(&self.workspace.root);
        Ok(self.runner.run(&spec).await?.success)
    }

    /// Install the enhanced detector unless it is already importable.
    ///
    /// Failure degrades to the baseline detector instead of aborting.
    pub async fn ensure_enhanced_detector(&self) -> Result<OptionalOutcome> {
        if self.is_importable(ENHANCED_PACKAGE).await? {
            return Ok(OptionalOutcome::AlreadyPresent);
        }

        let spec = CommandSpec::new(self.venv_pip())
            .args(["install", ENHANCED_PACKAGE])
            .cwd(&self.workspace.root);
        let out = run_with_spinner(self.runner, &spec, "Installing YOLO detector...").await?;

        if out.success {
            Ok(OptionalOutcome::Installed)
        } else {
            let reason = out.failure_summary();
            tracing::warn!(
                "{} install failed ({}); detection falls back to the OpenCV baseline",
                ENHANCED_PACKAGE,
                reason
            );
            Ok(OptionalOutcome::Degraded(reason))
        }
    }

    /// Run the application's model download script, if it ships one.
    pub async fn fetch_models(&self) -> Result<OptionalOutcome> {
        if !self.workspace.root.join(MODEL_SCRIPT).is_file() {
            return Ok(OptionalOutcome::Skipped);
        }

        std::fs::create_dir_all(self.workspace.models_dir())?;
        let spec = CommandSpec::new(self.venv_python())
            .arg(MODEL_SCRIPT)
            .cwd(&self.workspace.root);
        let out = run_with_spinner(self.runner, &spec, "Downloading detection models...").await?;

        if out.success {
            Ok(OptionalOutcome::Installed)
        } else {
            let reason = out.failure_summary();
            tracing::warn!("Model download failed: {}", reason);
            Ok(OptionalOutcome::Degraded(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::RecordingRunner;

    fn python() -> PythonRuntime {
        PythonRuntime {
            program: "python3".to_string(),
            version: (3, 11),
            raw: "Python 3.11.2".to_string(),
        }
    }

    fn workspace_with(files: &[&str]) -> (tempfile::TempDir, InstallationWorkspace) {
        let tmp = tempfile::tempdir().unwrap();
        for f in files {
            std::fs::write(tmp.path().join(f), "").unwrap();
        }
        let ws = InstallationWorkspace::open(tmp.path());
        (tmp, ws)
    }

    #[tokio::test]
    async fn test_create_venv_runs_module() {
        let (_tmp, ws) = workspace_with(&[]);
        let runner = RecordingRunner::new();
        assert!(PythonEnv::new(&runner, &ws).create_venv(&python()).await.unwrap());
        assert!(runner.calls()[0].starts_with("python3 -m venv"));
    }

    #[tokio::test]
    async fn test_create_venv_skips_existing() {
        let (tmp, ws) = workspace_with(&[]);
        std::fs::create_dir_all(tmp.path().join("venv/bin")).unwrap();
        std::fs::write(tmp.path().join("venv/bin/python"), "").unwrap();
        let runner = RecordingRunner::new();
        assert!(!PythonEnv::new(&runner, &ws).create_venv(&python()).await.unwrap());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_venv_failure_is_step_failure() {
        let (_tmp, ws) = workspace_with(&[]);
        let runner = RecordingRunner::new().fail_on("-m venv");
        let err = PythonEnv::new(&runner, &ws)
            .create_venv(&python())
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::StepFailure { .. }));
        assert!(err.follow_up().unwrap().contains("python3-venv"));
    }

    #[tokio::test]
    async fn test_requirements_missing_manifest() {
        let (_tmp, ws) = workspace_with(&[]);
        let runner = RecordingRunner::new();
        let err = PythonEnv::new(&runner, &ws)
            .install_requirements()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("requirements.txt"));
    }

    #[tokio::test]
    async fn test_requirements_pip_upgrade_failure_is_tolerated() {
        let (_tmp, ws) = workspace_with(&[REQUIREMENTS_FILE]);
        let runner = RecordingRunner::new().fail_on("--upgrade pip");
        PythonEnv::new(&runner, &ws)
            .install_requirements()
            .await
            .unwrap();
        assert_eq!(runner.count("install -r requirements.txt"), 1);
    }

    #[tokio::test]
    async fn test_requirements_failure_is_fatal() {
        let (_tmp, ws) = workspace_with(&[REQUIREMENTS_FILE]);
        let runner = RecordingRunner::new().fail_on("-r requirements.txt");
        let err = PythonEnv::new(&runner, &ws)
            .install_requirements()
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::StepFailure { .. }));
    }

    #[tokio::test]
    async fn test_enhanced_detector_check_before_install() {
        let (_tmp, ws) = workspace_with(&[]);
        let runner = RecordingRunner::new();
        let outcome = PythonEnv::new(&runner, &ws)
            .ensure_enhanced_detector()
            .await
            .unwrap();
        assert_eq!(outcome, OptionalOutcome::AlreadyPresent);
        assert_eq!(runner.count("pip install ultralytics"), 0);
    }

    #[tokio::test]
    async fn test_enhanced_detector_installs_when_missing() {
        let (_tmp, ws) = workspace_with(&[]);
        let runner = RecordingRunner::new().fail_on("import ultralytics");
        let outcome = PythonEnv::new(&runner, &ws)
            .ensure_enhanced_detector()
            .await
            .unwrap();
        assert_eq!(outcome, OptionalOutcome::Installed);
        assert_eq!(runner.count("pip install ultralytics"), 1);
    }

    #[tokio::test]
    async fn test_enhanced_detector_failure_degrades() {
        let (_tmp, ws) = workspace_with(&[]);
        let runner = RecordingRunner::new()
            .fail_on("import ultralytics")
            .fail_on("pip install ultralytics");
        let outcome = PythonEnv::new(&runner, &ws)
            .ensure_enhanced_detector()
            .await
            .unwrap();
        assert!(matches!(outcome, OptionalOutcome::Degraded(_)));
    }

    #[tokio::test]
    async fn test_fetch_models_skipped_without_script() {
        let (_tmp, ws) = workspace_with(&[]);
        let runner = RecordingRunner::new();
        let outcome = PythonEnv::new(&runner, &ws).fetch_models().await.unwrap();
        assert_eq!(outcome, OptionalOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_fetch_models_failure_degrades() {
        let (_tmp, ws) = workspace_with(&[MODEL_SCRIPT]);
        let runner = RecordingRunner::new().fail_on(MODEL_SCRIPT);
        let outcome = PythonEnv::new(&runner, &ws).fetch_models().await.unwrap();
        assert!(matches!(outcome, OptionalOutcome::Degraded(_)));
        assert!(ws.models_dir().is_dir());
    }
}
