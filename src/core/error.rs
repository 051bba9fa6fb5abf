use std::path::PathBuf;

use thiserror::Error;

/// A job spec that cannot be turned into a safe script.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{field} contains unsupported characters: '{value}'")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("{field} path contains unsupported characters: {}", .path.display())]
    InvalidPath { field: &'static str, path: PathBuf },
}

/// Why a job could not be queued.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid job: {0}")]
    Invalid(#[from] SpecError),

    #[error("job service is shutting down")]
    ShuttingDown,
}

/// Failures while running the external toolchain.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("toolchain settings file not found: {}", .0.display())]
    MissingSettings(PathBuf),

    #[error("failed to spawn toolchain shell '{}'", .shell.display())]
    Spawn {
        shell: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("toolchain stdout was not captured")]
    NoStdout,

    #[error("failed to read toolchain output")]
    Read(#[source] std::io::Error),

    #[error("failed to wait for toolchain")]
    Wait(#[source] std::io::Error),
}
