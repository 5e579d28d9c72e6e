// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::filter::rule::FilterRule;
use crate::sources::{FilterEvent, FilterSource, SourceError};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct State {
    clusters: HashMap<String, BTreeMap<String, FilterRule>>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<FilterEvent>>>,
}

impl State {
    // Called with the lock held so subscribers see changes in commit order.
    fn publish(&mut self, cluster: &str, event: &FilterEvent) {
        if let Some(subscribers) = self.subscribers.get_mut(cluster) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// In-process filter store.
///
/// Used for local deployments, where rules come from the configuration
/// file, and as a stand-in for a shared store in tests.
#[derive(Debug)]
pub struct InMemoryFilterSource {
    state: Mutex<State>,
    available: AtomicBool,
    retry_interval: Duration,
}

impl Default for InMemoryFilterSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFilterSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Store seeded with `filters` for `cluster`.
    #[must_use]
    pub fn with_filters(cluster: &str, filters: BTreeMap<String, FilterRule>) -> Self {
        let source = Self::new();
        source
            .state()
            .clusters
            .insert(cluster.to_string(), filters);
        source
    }

    /// Simulates the store becoming reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Creates or replaces a rule and notifies subscribers.
    pub fn upsert_filter(&self, cluster: &str, log_id: &str, rule: FilterRule) {
        let mut state = self.state();
        let previous = state
            .clusters
            .entry(cluster.to_string())
            .or_default()
            .insert(log_id.to_string(), rule.clone());
        let event = match previous {
            Some(_) => FilterEvent::Updated {
                log_id: log_id.to_string(),
                rule,
            },
            None => FilterEvent::Created {
                log_id: log_id.to_string(),
                rule,
            },
        };
        state.publish(cluster, &event);
    }

    /// Deletes a rule, notifying subscribers if it existed.
    pub fn delete_filter(&self, cluster: &str, log_id: &str) -> bool {
        let mut state = self.state();
        let removed = state
            .clusters
            .get_mut(cluster)
            .and_then(|filters| filters.remove(log_id))
            .is_some();
        if removed {
            state.publish(
                cluster,
                &FilterEvent::Removed {
                    log_id: log_id.to_string(),
                },
            );
        }
        removed
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<(), SourceError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SourceError::Unavailable(
                "in-memory filter store is switched off".to_string(),
            ))
        }
    }
}

#[async_trait]
impl FilterSource for InMemoryFilterSource {
    async fn wait_until_available(&self, cluster: &str) -> Result<(), SourceError> {
        while self.ensure_available().is_err() {
            debug!("FILTER_STORE | Waiting for filter store root of cluster {cluster}");
            tokio::time::sleep(self.retry_interval).await;
        }
        Ok(())
    }

    async fn get_filters(&self, cluster: &str) -> Result<BTreeMap<String, FilterRule>, SourceError> {
        self.ensure_available()?;
        Ok(self.state().clusters.get(cluster).cloned().unwrap_or_default())
    }

    async fn create_filter(
        &self,
        cluster: &str,
        log_id: &str,
        rule: &FilterRule,
    ) -> Result<(), SourceError> {
        self.ensure_available()?;
        let mut state = self.state();
        let filters = state.clusters.entry(cluster.to_string()).or_default();
        if filters.contains_key(log_id) {
            debug!("FILTER_STORE | Filter for log {log_id} already exists in cluster {cluster}");
            return Ok(());
        }
        filters.insert(log_id.to_string(), rule.clone());
        state.publish(
            cluster,
            &FilterEvent::Created {
                log_id: log_id.to_string(),
                rule: rule.clone(),
            },
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        cluster: &str,
    ) -> Result<mpsc::UnboundedReceiver<FilterEvent>, SourceError> {
        self.ensure_available()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.state()
            .subscribers
            .entry(cluster.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rule(label: &str, level: &str) -> FilterRule {
        FilterRule::with_defaults(label, &[level.to_string()])
    }

    #[tokio::test]
    async fn test_seeded_filters() {
        let source = InMemoryFilterSource::with_filters(
            "cl1",
            BTreeMap::from([("app1".to_string(), rule("app1", "INFO"))]),
        );
        assert_eq!(source.get_filters("cl1").await.unwrap().len(), 1);
        assert!(source.get_filters("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_does_not_overwrite() {
        let source = InMemoryFilterSource::new();
        source.upsert_filter("cl1", "app1", rule("app1", "ERROR"));
        source
            .create_filter("cl1", "app1", &rule("app1", "INFO"))
            .await
            .unwrap();
        assert_eq!(
            source.get_filters("cl1").await.unwrap()["app1"],
            rule("app1", "ERROR")
        );
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let source = InMemoryFilterSource::new();
        let mut rx = source.subscribe("cl1").await.unwrap();

        source.upsert_filter("cl1", "app1", rule("app1", "INFO"));
        source.upsert_filter("cl1", "app1", rule("app1", "WARN"));
        source.upsert_filter("cl2", "app9", rule("app9", "WARN"));
        assert!(source.delete_filter("cl1", "app1"));
        assert!(!source.delete_filter("cl1", "app1"));

        assert!(matches!(rx.recv().await, Some(FilterEvent::Created { .. })));
        assert_eq!(
            rx.recv().await,
            Some(FilterEvent::Updated {
                log_id: "app1".to_string(),
                rule: rule("app1", "WARN")
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(FilterEvent::Removed {
                log_id: "app1".to_string()
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_calls() {
        let source = InMemoryFilterSource::new();
        source.set_available(false);
        assert!(matches!(
            source.get_filters("cl1").await,
            Err(SourceError::Unavailable(_))
        ));
        assert!(source.subscribe("cl1").await.is_err());
        assert!(
            source
                .create_filter("cl1", "app1", &FilterRule::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_wait_until_available_resumes() {
        let source = std::sync::Arc::new(InMemoryFilterSource::new());
        source.set_available(false);
        let waiter = {
            let source = source.clone();
            tokio::spawn(async move { source.wait_until_available("cl1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        source.set_available(true);
        waiter.await.unwrap().unwrap();
    }
}
