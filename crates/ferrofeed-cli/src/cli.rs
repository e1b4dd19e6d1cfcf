//! CLI argument definitions for ferrofeed.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `test` | Test a source endpoint and report its schema |
//! | `discover` | Discover fields and financial series in a JSON document |
//! | `watch` | Synchronize a source and stream updates as NDJSON |
//!
//! # Examples
//!
//! ```bash
//! # Test an endpoint described by a source file
//! ferrofeed test source.json --pretty
//!
//! # Inspect a saved response
//! curl -s https://api.example.com/prices | ferrofeed discover -
//!
//! # Stream live updates until Ctrl-C
//! ferrofeed watch source.json --source-id prices
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// ferrofeed - keep arbitrary JSON endpoints in sync as flat records
#[derive(Debug, Parser)]
#[command(
    name = "ferrofeed",
    author,
    version,
    about = "Discover, normalize and synchronize JSON data sources",
    long_about = "ferrofeed tests HTTP endpoints, discovers the shape of their JSON, and keeps \
them synchronized by polling or over WebSocket/Socket.IO connections.\n\
\n\
Set FERROFEED_LOG (e.g. FERROFEED_LOG=info) to see diagnostics on stderr."
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Test an endpoint once and print the discovered schema.
    Test(TestArgs),
    /// Discover fields in a JSON document (file path or `-` for stdin).
    Discover(DiscoverArgs),
    /// Start synchronization and print every update as an NDJSON event.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct TestArgs {
    /// Source configuration file (JSON, camelCase keys).
    pub config: PathBuf,

    /// Request timeout in milliseconds; overrides `timeoutMs` in the file.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// JSON document to inspect; reads stdin when omitted or `-`.
    #[arg(default_value = "-")]
    pub input: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Source configuration file (JSON, camelCase keys).
    pub config: PathBuf,

    /// Identifier reported in every event; generated when omitted.
    #[arg(long, env = "FERROFEED_SOURCE_ID")]
    pub source_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn discover_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["ferrofeed", "discover"]).expect("valid args");
        match cli.command {
            Command::Discover(args) => assert_eq!(args.input, "-"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_accepts_timeout_override() {
        let cli = Cli::try_parse_from(["ferrofeed", "test", "source.json", "--timeout-ms", "2500", "--pretty"])
            .expect("valid args");
        assert!(cli.pretty);
        match cli.command {
            Command::Test(args) => assert_eq!(args.timeout_ms, Some(2_500)),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
