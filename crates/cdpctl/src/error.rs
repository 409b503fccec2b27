//! Top-level CLI error type and the exit-code mapping from PRD §6.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid flag combination, unknown service, malformed CSV header —
    /// exit code 1.
    #[error("config error: {0}")]
    Config(String),

    /// Unrecoverable provider auth failure at startup — exit code 2.
    #[error("auth error: {0}")]
    Auth(String),

    /// Anything else that aborts the run outright (should not normally
    /// happen — per-region/per-batch failures are caught and folded into
    /// results rather than propagated here).
    #[error(transparent)]
    Run(#[from] anyhow::Error),
}

impl CliError {
    /// Exit code per PRD §6: 1 for `Config`, 2 for `Auth`, 1 for anything
    /// else that slipped through to `main` as a bare error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Auth(_) => 2,
            Self::Run(_) => 1,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
