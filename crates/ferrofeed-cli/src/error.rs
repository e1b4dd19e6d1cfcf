use std::path::PathBuf;

use thiserror::Error;

use crate::output::StreamError;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Sync(#[from] ferrofeed_core::SyncError),

    #[error("cannot load source config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("input is not valid JSON: {0}")]
    Input(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config { .. } | Self::Input(_) => 2,
            Self::Sync(_) => 3,
            Self::Serialization(_) => 4,
            Self::Stream(_) => 6,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_test_failures_exit_with_three() {
        let error = CliError::from(ferrofeed_core::SyncError::http_status(404));
        assert_eq!(error.exit_code(), 3);
        assert_eq!(error.to_string(), "HTTP 404 Not Found");
    }

    #[test]
    fn config_errors_name_the_file() {
        let error = CliError::Config {
            path: PathBuf::from("missing.json"),
            message: String::from("not found"),
        };
        assert_eq!(error.exit_code(), 2);
        assert!(error.to_string().contains("missing.json"));
    }
}
