use std::io::Read;

use ferrofeed_core::{detect_series_paths, discover, DiscoveryResult};
use serde::Serialize;
use serde_json::Value;

use crate::cli::DiscoverArgs;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverOutput {
    #[serde(flatten)]
    discovery: DiscoveryResult,
    financial_series_paths: Vec<String>,
}

pub fn run(args: &DiscoverArgs, pretty: bool) -> Result<(), CliError> {
    let text = if args.input == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(&args.input)?
    };

    output::render(&discover_document(&text)?, pretty)
}

fn discover_document(text: &str) -> Result<DiscoverOutput, CliError> {
    let document: Value = serde_json::from_str(text).map_err(|e| CliError::Input(e.to_string()))?;
    Ok(DiscoverOutput {
        discovery: discover(&document),
        financial_series_paths: detect_series_paths(&document),
    })
}
