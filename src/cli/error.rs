//! CLI error types and exit codes

use crate::archive::FetchError;
use crate::output::OutputError;
use crate::pipeline::PipelineError;
use crate::ConfigError;

/// Exit code for a completed run, even with individual file failures
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code when output could not be written or the run could not start
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for invalid configuration
pub const EXIT_CONFIG: i32 = 2;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Run could not be started or completed
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// HTTP client could not be created
    #[error("fetcher error: {0}")]
    Fetch(#[from] FetchError),

    /// Table could not be inspected or merged
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Summary could not be serialized
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_)
            | CliError::Pipeline(PipelineError::Config(_))
            | CliError::Output(OutputError::ConfigurationError(_)) => EXIT_CONFIG,
            _ => EXIT_FAILURE,
        }
    }
}
