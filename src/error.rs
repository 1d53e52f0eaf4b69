use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    /// A mandatory tool, runtime or privilege is missing. Aborts the whole flow.
    #[error("{message}")]
    FatalPrecondition { message: String, hint: Option<String> },

    /// A mutating step's external process failed. Earlier steps stay applied.
    #[error("{step} failed: {message}")]
    StepFailure {
        step: String,
        message: String,
        inspect: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Dialog error: {0}")]
    Dialog(#[from] dialoguer::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SetupError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::FatalPrecondition {
            message: message.into(),
            hint: None,
        }
    }

    pub fn fatal_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::FatalPrecondition {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepFailure {
            step: step.into(),
            message: message.into(),
            inspect: None,
        }
    }

    /// Attach the command an operator should run to investigate this failure.
    pub fn with_inspect(self, command: impl Into<String>) -> Self {
        match self {
            Self::StepFailure { step, message, .. } => Self::StepFailure {
                step,
                message,
                inspect: Some(command.into()),
            },
            Self::FatalPrecondition { message, .. } => Self::FatalPrecondition {
                message,
                hint: Some(command.into()),
            },
            other => other,
        }
    }

    /// Follow-up text printed under the diagnostic, if any.
    pub fn follow_up(&self) -> Option<&str> {
        match self {
            Self::FatalPrecondition { hint, .. } => hint.as_deref(),
            Self::StepFailure { inspect, .. } => inspect.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SetupError>;

/// Result of an optional sub-flow the operator may decline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    Declined,
}

impl<T> Outcome<T> {
    #[cfg(test)]
    pub fn is_declined(&self) -> bool {
        matches!(self, Self::Declined)
    }
}
