// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::filter::rule::FilterRule;
use crate::filter::store::RuleStore;
use crate::sources::{FilterEvent, FilterSource, SourceError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("filter store did not finish bootstrapping within {0:?}")]
    BootstrapTimeout(Duration),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Keeps a [`RuleStore`] in step with a shared [`FilterSource`].
///
/// Live watching only runs for deployments that read local input configs
/// while keeping filters in the shared store; everywhere else the initial
/// load from [`ConfigSyncBridge::load_initial`] is all that is needed.
#[derive(Debug)]
pub struct ConfigSyncBridge {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl ConfigSyncBridge {
    /// Waits for the store root, then replaces the contents of `store` with
    /// every rule of `cluster`. The whole sequence is bounded by `timeout`.
    /// Returns the number of rules loaded.
    pub async fn load_initial(
        source: &dyn FilterSource,
        store: &RuleStore,
        cluster: &str,
        timeout: Duration,
    ) -> Result<usize, SyncError> {
        let filters = bounded(timeout, async {
            source.wait_until_available(cluster).await?;
            source.get_filters(cluster).await
        })
        .await?;
        Ok(load(store, cluster, filters))
    }

    /// Subscribes to `cluster`, bulk loads it, then applies live changes on a
    /// background task until shut down.
    ///
    /// The subscription is opened before the bulk read so no change made in
    /// between is lost; replaying it over the loaded state is harmless. Wait,
    /// subscription and bulk read together are bounded by `timeout`.
    pub async fn start(
        source: Arc<dyn FilterSource>,
        store: Arc<RuleStore>,
        cluster: &str,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let (rx, filters) = bounded(timeout, async {
            source.wait_until_available(cluster).await?;
            let rx = source.subscribe(cluster).await?;
            let filters = source.get_filters(cluster).await?;
            Ok((rx, filters))
        })
        .await?;
        load(&store, cluster, filters);

        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(Self::run(rx, store, cancel_token.clone()));
        debug!("FILTER_SYNC | Watching filters of cluster {cluster}");

        Ok(Self { cancel_token, task })
    }

    /// Stops applying changes and waits for the watcher task to exit.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            error!("FILTER_SYNC | Watcher task failed: {e}");
        }
    }

    async fn run(
        mut rx: mpsc::UnboundedReceiver<FilterEvent>,
        store: Arc<RuleStore>,
        cancel_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => apply_event(&store, event),
                    None => {
                        debug!("FILTER_SYNC | Filter subscription closed");
                        break;
                    }
                },
                () = cancel_token.cancelled() => {
                    debug!("FILTER_SYNC | Received shutdown signal");
                    break;
                }
            }
        }
    }
}

fn load(store: &RuleStore, cluster: &str, filters: BTreeMap<String, FilterRule>) -> usize {
    let count = filters.len();
    store.replace_all(filters);
    info!("FILTER_SYNC | Loaded {count} filters for cluster {cluster}");
    count
}

async fn bounded<T>(
    timeout: Duration,
    bootstrap: impl Future<Output = Result<T, SourceError>>,
) -> Result<T, SyncError> {
    match tokio::time::timeout(timeout, bootstrap).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SyncError::BootstrapTimeout(timeout)),
    }
}

/// Applies one change notification to `store`.
pub fn apply_event(store: &RuleStore, event: FilterEvent) {
    match event {
        FilterEvent::Created { log_id, rule } | FilterEvent::Updated { log_id, rule } => {
            debug!("FILTER_SYNC | Setting filter for log {log_id}");
            store.put(&log_id, rule);
        }
        FilterEvent::Removed { log_id } => {
            debug!("FILTER_SYNC | Removing filter for log {log_id}");
            store.remove(&log_id);
        }
    }
}
