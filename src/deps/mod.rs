//! Dependency resolution: application source, isolated runtime, packages.

pub mod python;
pub mod source;

pub use python::PythonEnv;
pub use source::{acquire_source, NetworkFetcher, SourceFetcher, SourceOrigin};

use std::fmt;

/// Result of a step whose failure must not abort the install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionalOutcome {
    Installed,
    AlreadyPresent,
    Skipped,
    /// The step failed; the feature runs with reduced capability.
    Degraded(String),
}

impl OptionalOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

impl fmt::Display for OptionalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed => write!(f, "installed"),
            Self::AlreadyPresent => write!(f, "already present"),
            Self::Skipped => write!(f, "skipped"),
            Self::Degraded(reason) => write!(f, "degraded ({})", reason),
        }
    }
}
