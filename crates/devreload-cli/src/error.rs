//! CLI error types.

use devreload::{CloseError, SetupError};
use devreload_config::ConfigError;

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to watch files: {0}")]
    Setup(#[from] SetupError),

    #[error("Failed to stop live reload: {0}")]
    Close(#[from] CloseError),

    #[error("{0}")]
    Validation(String),
}
