//! CLI-specific error types and exit code mapping

use ironbot_core::error::IronbotError;

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to standard Unix exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// The pipeline document does not resolve.
    #[error("pipeline is invalid: {0} error(s)")]
    InvalidPipeline(usize),

    /// Some units in a batch operation failed (the report was already printed).
    #[error("{failed} of {total} unit(s) failed")]
    UnitsFailed { failed: usize, total: usize },

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from ironbot-core.
    #[error("{0}")]
    Core(#[from] IronbotError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                              |
    /// |------|--------------------------------------|
    /// | 0    | Success                              |
    /// | 1    | General / command error              |
    /// | 2    | Configuration error                  |
    /// | 3    | Pipeline does not resolve            |
    /// | 4    | One or more units failed             |
    /// | 5    | Unknown target                       |
    /// | 10   | IO error                             |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::InvalidPipeline(_) => 3,
            Self::UnitsFailed { .. } => 4,
            Self::Io(_) => 10,
            Self::Core(e) => match e {
                IronbotError::Config(_) => 2,
                IronbotError::Resolution(_) => 3,
                IronbotError::NotFound { .. } => 5,
                IronbotError::Io(_) => 10,
                _ => 1,
            },
            Self::JsonSerialize(_) | Self::Command(_) => 1,
        }
    }
}
