#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]

use levelgate::{
    CONFIG_DIR_ENV,
    config::{self, Config, filter_storage::FilterStorage},
    filter::{
        AdmissionGate, ConfigSyncBridge, InputContext, PersisterService, RuleStore, SyncError,
        SystemClock,
    },
    http_client, logger,
    sources::{FilterSource, http::HttpFilterSource, memory::InMemoryFilterSource},
};
use std::{
    env,
    io::{Error, ErrorKind, Result},
    path::Path,
    process,
    sync::Arc,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_configs();

    enable_logging_subsystem(&config);

    let source = build_source(&config);
    let (persister, persister_handle) =
        PersisterService::new(Arc::clone(&source), config.cluster_name.clone());
    let persister_task = tokio::spawn(persister.run());
    let store = Arc::new(RuleStore::new(Some(persister_handle)));

    let bridge = match bootstrap(&config, &source, &store).await {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("Failed to load log level filters: {e}");
            process::exit(1);
        }
    };

    let gate = AdmissionGate::new(
        Arc::clone(&store),
        Arc::new(SystemClock),
        config.log_filter_enabled,
    );
    let input = InputContext::new(config.input_row_type.clone());
    let (admitted, dropped) = pump_records(&gate, &input, &config.default_log_levels).await?;
    info!("Input closed, admitted {admitted} records and dropped {dropped}");

    if let Some(bridge) = bridge {
        bridge.shutdown().await;
    }
    // Dropping the last store reference closes the persister channel
    drop(gate);
    drop(store);
    if let Err(e) = persister_task.await {
        error!("Persister task failed: {e}");
    }

    Ok(())
}

fn load_configs() -> Arc<Config> {
    let config_directory = env::var(CONFIG_DIR_ENV).unwrap_or_else(|_| ".".to_string());
    match config::get_config(Path::new(&config_directory)) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Error starting levelgate: {e}");
            process::exit(1);
        }
    }
}

fn enable_logging_subsystem(config: &Arc<Config>) {
    let filter = EnvFilter::try_new(config.log_level.env_filter_directives()).unwrap_or_else(|_| {
        EnvFilter::default().add_directive(config.log_level.as_level_filter().into())
    });
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .without_time()
        .event_format(logger::Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set the logging subscriber: {e}");
    }

    debug!("Logging subsystem enabled");
}

fn build_source(config: &Arc<Config>) -> Arc<dyn FilterSource> {
    match config.log_filter_storage {
        FilterStorage::Local => Arc::new(InMemoryFilterSource::with_filters(
            &config.cluster_name,
            config.log_level_filters.clone(),
        )),
        FilterStorage::Remote => {
            let client = http_client::get_client(config);
            let url = config.filter_store_url.as_deref().unwrap_or_default();
            Arc::new(HttpFilterSource::new(client, url, config.poll_interval()))
        }
    }
}

/// Fills the store from its source, and keeps it in sync when configured to.
async fn bootstrap(
    config: &Arc<Config>,
    source: &Arc<dyn FilterSource>,
    store: &Arc<RuleStore>,
) -> std::result::Result<Option<ConfigSyncBridge>, SyncError> {
    if config.should_watch_filters() {
        let bridge = ConfigSyncBridge::start(
            Arc::clone(source),
            Arc::clone(store),
            &config.cluster_name,
            config.bootstrap_timeout(),
        )
        .await?;
        return Ok(Some(bridge));
    }

    ConfigSyncBridge::load_initial(
        source.as_ref(),
        store,
        &config.cluster_name,
        config.bootstrap_timeout(),
    )
    .await?;
    Ok(None)
}

/// Copies admitted newline-delimited records from stdin to stdout until EOF.
async fn pump_records(
    gate: &AdmissionGate,
    input: &InputContext,
    default_levels: &[String],
) -> Result<(u64, u64)> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = BufWriter::new(tokio::io::stdout());
    let (mut admitted, mut dropped) = (0_u64, 0_u64);

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("Failed to read input: {e}")))?
    {
        if line.trim().is_empty() {
            continue;
        }
        if gate.is_allowed_json(&line, input, default_levels) {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            admitted += 1;
        } else {
            dropped += 1;
        }
    }
    stdout.flush().await?;

    Ok((admitted, dropped))
}
