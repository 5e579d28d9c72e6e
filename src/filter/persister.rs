// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::filter::rule::FilterRule;
use crate::sources::FilterSource;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Failed to send command to persister: {0}")]
    SendError(#[from] mpsc::error::SendError<PersistCommand>),
}

#[derive(Debug)]
pub enum PersistCommand {
    Create { log_id: String, rule: FilterRule },
}

/// Cheap, cloneable entry point used by the store on the hot path.
#[derive(Clone, Debug)]
pub struct PersisterHandle {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl PersisterHandle {
    /// Queues a synthesized rule for creation in the backing store.
    ///
    /// Never blocks; the write itself happens on the persister task.
    pub fn persist(&self, log_id: &str, rule: &FilterRule) -> Result<(), PersistError> {
        self.tx.send(PersistCommand::Create {
            log_id: log_id.to_string(),
            rule: rule.clone(),
        })?;
        Ok(())
    }
}

/// Writes locally synthesized default rules back to the filter store.
///
/// Failures are logged and dropped: the in-memory rule keeps applying.
pub struct PersisterService {
    source: Arc<dyn FilterSource>,
    cluster: String,
    rx: mpsc::UnboundedReceiver<PersistCommand>,
}

impl PersisterService {
    #[must_use]
    pub fn new(source: Arc<dyn FilterSource>, cluster: String) -> (Self, PersisterHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            source,
            cluster,
            rx,
        };
        (service, PersisterHandle { tx })
    }

    /// Runs until every handle has been dropped.
    pub async fn run(mut self) {
        debug!("FILTER_STORE | Persister started for cluster {}", self.cluster);

        while let Some(command) = self.rx.recv().await {
            match command {
                PersistCommand::Create { log_id, rule } => {
                    match self.source.create_filter(&self.cluster, &log_id, &rule).await {
                        Ok(()) => debug!("FILTER_STORE | Persisted default filter for log {log_id}"),
                        Err(e) => {
                            warn!("FILTER_STORE | Could not persist the default filter for log {log_id}: {e}");
                        }
                    }
                }
            }
        }

        debug!("FILTER_STORE | Persister stopped");
    }

    #[cfg(test)]
    pub(crate) fn into_receiver(self) -> mpsc::UnboundedReceiver<PersistCommand> {
        self.rx
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sources::memory::InMemoryFilterSource;

    #[tokio::test]
    async fn test_persist_creates_rule_in_source() {
        let source = Arc::new(InMemoryFilterSource::new());
        let (service, handle) = PersisterService::new(source.clone(), "cl1".to_string());
        let task = tokio::spawn(service.run());

        let rule = FilterRule::with_defaults("app1", &["INFO".to_string()]);
        handle.persist("app1", &rule).unwrap();
        drop(handle);
        task.await.unwrap();

        let stored = source.get_filters("cl1").await.unwrap();
        assert_eq!(stored.get("app1"), Some(&rule));
    }

    #[tokio::test]
    async fn test_unavailable_source_is_swallowed() {
        let source = Arc::new(InMemoryFilterSource::new());
        source.set_available(false);
        let (service, handle) = PersisterService::new(source.clone(), "cl1".to_string());
        let task = tokio::spawn(service.run());

        handle
            .persist("app1", &FilterRule::with_defaults("app1", &[]))
            .unwrap();
        drop(handle);
        task.await.unwrap();

        source.set_available(true);
        assert!(source.get_filters("cl1").await.unwrap().is_empty());
    }

    #[test]
    fn test_persist_after_service_dropped_reports_error() {
        let source = Arc::new(InMemoryFilterSource::new());
        let (service, handle) = PersisterService::new(source, "cl1".to_string());
        drop(service);
        assert!(handle.persist("app1", &FilterRule::default()).is_err());
    }
}
