mod discover;
mod test_source;
mod watch;

use std::path::Path;

use ferrofeed_core::SourceConfig;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Test(args) => test_source::run(args, cli.pretty).await,
        Command::Discover(args) => discover::run(args, cli.pretty),
        Command::Watch(args) => watch::run(args).await,
    }
}

/// Reads a source configuration file (camelCase JSON).
pub(crate) fn load_source(path: &Path) -> Result<SourceConfig, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| CliError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| CliError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use ferrofeed_core::{Authentication, SocketKind};

    use super::*;

    #[test]
    fn loads_camel_case_source_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{
                "endpoint": "https://api.example.com/prices",
                "authentication": {{"type": "api_key", "headerName": "X-Key", "key": "k"}},
                "socketUrl": "https://stream.example.com",
                "socketType": "socketio",
                "refreshIntervalMs": 5000,
                "financialDataPath": "Time Series (Daily)"
            }}"#
        )
        .expect("write config");

        let config = load_source(file.path()).expect("valid config");

        assert_eq!(config.refresh_interval_ms, Some(5_000));
        assert_eq!(config.socket_kind(), Some(SocketKind::Event));
        assert!(matches!(config.authentication, Authentication::ApiKey { .. }));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let directory = tempfile::tempdir().expect("temp dir");
        let error = load_source(&directory.path().join("absent.json")).expect_err("missing file");
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "{{\"endpoint\": ").expect("write config");

        let error = load_source(file.path()).expect_err("truncated json");
        assert!(matches!(error, CliError::Config { .. }));
    }
}
