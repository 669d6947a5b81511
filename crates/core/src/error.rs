use std::path::PathBuf;
use thiserror::Error;

/// Startup-level failures. These stop a run before any file is touched.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unknown location '{0}'")]
    UnknownLocation(String),
    #[error("source root {path} is not readable: {source}")]
    SourceRootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not inside any configured location")]
    OutsideLocations(PathBuf),
    #[error("{step} failed: {message}")]
    StepFailure { step: Step, message: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The step of a full conversion that failed. The tag is what lands in the
/// ledger's `conversion_args` column for a FAILED row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    AutoOrient,
    Identify,
    ResizeOrCopy,
}

impl Step {
    pub fn tag(&self) -> &'static str {
        match self {
            Step::AutoOrient => "-auto-orient",
            Step::Identify => "-identify",
            Step::ResizeOrCopy => "-resize-or-copy",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
