use std::io::Stdout;
use std::sync::{Arc, Mutex};

use ferrofeed_core::{EngineConfig, SyncCallbacks, SyncEngine, UpdateBatch, UpdateKind};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::cli::WatchArgs;
use crate::commands::load_source;
use crate::error::CliError;
use crate::output::{NdjsonStreamWriter, StreamError, StreamEventError};

type SharedWriter = Arc<Mutex<NdjsonStreamWriter<Stdout>>>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEvent<'a> {
    kind: UpdateKind,
    #[serde(flatten)]
    batch: &'a UpdateBatch,
}

pub async fn run(args: &WatchArgs) -> Result<(), CliError> {
    let config = load_source(&args.config)?;
    let source_id = args
        .source_id
        .clone()
        .unwrap_or_else(|| format!("watch-{}", Uuid::new_v4()));

    let engine = SyncEngine::builder()
        .with_config(EngineConfig::from_env()?)
        .build();
    let writer: SharedWriter = Arc::new(Mutex::new(NdjsonStreamWriter::new(std::io::stdout())));

    lock(&writer).emit_start(json!({
        "sourceId": source_id,
        "endpoint": config.endpoint,
        "socketUrl": config.socket_url,
        "refreshIntervalMs": config.refresh_interval_ms,
    }))?;

    engine.start(&source_id, config, callbacks(Arc::clone(&writer)));
    tokio::signal::ctrl_c().await?;

    let transport = engine.transport(&source_id);
    engine.stop(&source_id);
    lock(&writer).emit_end(json!({
        "sourceId": source_id,
        "transport": transport,
    }))?;
    Ok(())
}

fn callbacks(writer: SharedWriter) -> SyncCallbacks {
    let updates = Arc::clone(&writer);
    SyncCallbacks::new(
        move |batch, kind| {
            let written = serde_json::to_value(UpdateEvent { kind, batch: &batch })
                .map_err(StreamError::from)
                .and_then(|data| lock(&updates).emit_update(data));
            if let Err(error) = written {
                tracing::error!(%error, "failed to write update event");
            }
        },
        move |error| {
            if let Err(write_error) = lock(&writer).emit_error(StreamEventError::from(&error), None) {
                tracing::error!(error = %write_error, "failed to write error event");
            }
        },
    )
}

fn lock(writer: &SharedWriter) -> std::sync::MutexGuard<'_, NdjsonStreamWriter<Stdout>> {
    writer.lock().expect("stream writer lock is not poisoned")
}
