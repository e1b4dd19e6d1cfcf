use ferrofeed_core::{ConnectionTester, EngineConfig};

use crate::cli::TestArgs;
use crate::commands::load_source;
use crate::error::CliError;
use crate::output;

pub async fn run(args: &TestArgs, pretty: bool) -> Result<(), CliError> {
    let mut config = load_source(&args.config)?;
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = Some(timeout_ms);
    }

    let engine_config = EngineConfig::from_env()?;
    let tester = ConnectionTester::default().with_default_timeout(engine_config.request_timeout);

    let report = tester.test(&config).await?;
    tracing::info!(
        status = report.status_code,
        fields = report.total_field_count,
        response_time_ms = report.response_time_ms,
        "connection test succeeded"
    );
    output::render(&report, pretty)
}
