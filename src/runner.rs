//! External process execution.
//!
//! Every stage talks to git, pip, systemctl, package managers and the tunnel
//! client through [`CommandRunner`], so the sequencing logic can be exercised
//! against a recording fake instead of a live system.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{Result, SetupError};

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Run with elevated privilege (prefixed with `sudo` unless already root).
    pub elevated: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            elevated: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    /// Shell-like rendering used in diagnostics and retry hints.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 2);
        if self.elevated {
            parts.push("sudo".to_string());
        }
        parts.push(self.program.clone());
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                parts.push(format!("'{}'", arg));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[cfg(test)]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    #[cfg(test)]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Short description of why the command failed.
    pub fn failure_summary(&self) -> String {
        let detail = self
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim();
        match (self.code, detail.is_empty()) {
            (Some(code), true) => format!("exit status {}", code),
            (Some(code), false) => format!("exit status {}: {}", code, detail),
            (None, true) => "terminated by signal".to_string(),
            (None, false) => format!("terminated by signal: {}", detail),
        }
    }

    /// Convert a non-zero exit into a [`SetupError::StepFailure`].
    pub fn require_success(self, step: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(SetupError::step(step, self.failure_summary()))
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. Spawn failures (program missing) are
    /// reported as a failed output with no exit code, not as an `Err`.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Whether a program can be found on PATH.
    fn has_program(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

/// Runs commands on the local machine with `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    as_root: bool,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self {
            as_root: is_root(),
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let (program, args) = if spec.elevated && !self.as_root {
            let mut args = vec![spec.program.clone()];
            args.extend(spec.args.iter().cloned());
            ("sudo".to_string(), args)
        } else {
            (spec.program.clone(), spec.args.clone())
        };

        tracing::debug!("running: {}", spec.display());

        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!("failed to spawn {}: {}", program, e);
                return Ok(CommandOutput {
                    success: false,
                    code: None,
                    stdout: String::new(),
                    stderr: format!("{}: {}", program, e),
                });
            }
        };

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run a long external step behind a spinner.
pub async fn run_with_spinner(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    message: &str,
) -> Result<CommandOutput> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("  {spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = runner.run(spec).await;
    spinner.finish_and_clear();
    result
}

#[cfg(unix)]
pub fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_whitespace() {
        let spec = CommandSpec::new("git")
            .args(["commit", "-m", "two words"])
            .elevated();
        assert_eq!(spec.display(), "sudo git commit -m 'two words'");
    }

    #[test]
    fn test_failure_summary_uses_last_stderr_line() {
        let out = CommandOutput::failed(128, "warning: x\nfatal: repository not found\n\n");
        assert_eq!(
            out.failure_summary(),
            "exit status 128: fatal: repository not found"
        );
    }

    #[test]
    fn test_failure_summary_without_code() {
        let out = CommandOutput {
            success: false,
            code: None,
            ..Default::default()
        };
        assert_eq!(out.failure_summary(), "terminated by signal");
    }

    #[test]
    fn test_require_success() {
        assert!(CommandOutput::ok("fine").require_success("step").is_ok());
        let err = CommandOutput::failed(2, "")
            .require_success("daemon-reload")
            .unwrap_err();
        assert_eq!(err.to_string(), "daemon-reload failed: exit status 2");
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let runner = SystemRunner::new();
        let out = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo hello; exit 3"]))
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_system_runner_missing_program_is_failed_output() {
        let runner = SystemRunner::new();
        let out = runner
            .run(&CommandSpec::new("definitely-not-a-real-binary-b360"))
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.code.is_none());
    }
}
