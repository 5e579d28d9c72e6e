// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{info, warn};

use crate::filter::persister::PersisterHandle;
use crate::filter::rule::FilterRule;

/// Concurrent map of log source id to its [`FilterRule`].
///
/// Reads go through the sharded map without a global lock. Synthesizing a
/// missing rule takes the shard lock for that key only, so concurrent misses
/// on the same id produce exactly one rule.
#[derive(Debug, Default)]
pub struct RuleStore {
    rules: DashMap<String, Arc<FilterRule>>,
    persister: Option<PersisterHandle>,
}

impl RuleStore {
    #[must_use]
    pub fn new(persister: Option<PersisterHandle>) -> Self {
        Self {
            rules: DashMap::new(),
            persister,
        }
    }

    #[must_use]
    pub fn get(&self, log_id: &str) -> Option<Arc<FilterRule>> {
        self.rules.get(log_id).map(|r| Arc::clone(r.value()))
    }

    /// Returns the rule for `log_id`, creating a default one on first sight.
    ///
    /// A created rule is queued for persistence; that write can fail without
    /// affecting the returned rule.
    pub fn resolve_or_create(&self, log_id: &str, default_levels: &[String]) -> Arc<FilterRule> {
        if let Some(rule) = self.get(log_id) {
            return rule;
        }

        let created = match self.rules.entry(log_id.to_string()) {
            Entry::Occupied(entry) => return Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                info!("LOG_FILTER | Filter is not present for log {log_id}, creating default filter");
                let rule = Arc::new(FilterRule::with_defaults(log_id, default_levels));
                entry.insert(Arc::clone(&rule));
                rule
            }
        };

        // Shard lock is released here; persistence never runs under it.
        if let Some(persister) = &self.persister {
            if let Err(e) = persister.persist(log_id, &created) {
                warn!("LOG_FILTER | Could not persist the default filter for log {log_id}: {e}");
            }
        }

        created
    }

    /// Inserts or replaces the rule for `log_id`. Last write wins.
    pub fn put(&self, log_id: &str, rule: FilterRule) {
        self.rules.insert(log_id.to_string(), Arc::new(rule));
    }

    /// Removes the rule for `log_id`, returning whether one was present.
    pub fn remove(&self, log_id: &str) -> bool {
        self.rules.remove(log_id).is_some()
    }

    /// Replaces every rule with `rules`, dropping ids not in the new set.
    pub fn replace_all(&self, rules: BTreeMap<String, FilterRule>) {
        self.rules.retain(|log_id, _| rules.contains_key(log_id));
        for (log_id, rule) in rules {
            self.put(&log_id, rule);
        }
    }

    /// Owned copy of every rule, keyed and sorted by log id.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, FilterRule> {
        self.rules
            .iter()
            .map(|r| (r.key().clone(), FilterRule::clone(r.value())))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::filter::persister::{PersistCommand, PersisterService};
    use crate::sources::memory::InMemoryFilterSource;
    use std::sync::Barrier;
    use std::thread;

    fn levels(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_get_missing() {
        let store = RuleStore::new(None);
        assert!(store.get("app1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_resolve_or_create_synthesizes_default() {
        let store = RuleStore::new(None);
        let rule = store.resolve_or_create("app1", &levels(&["INFO", "WARN"]));
        assert_eq!(rule.label, "app1");
        assert_eq!(rule.default_levels, levels(&["INFO", "WARN"]));
        assert!(!rule.has_override());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_resolve_or_create_keeps_existing() {
        let store = RuleStore::new(None);
        store.put(
            "app1",
            FilterRule {
                label: "app1".to_string(),
                default_levels: levels(&["ERROR"]),
                ..FilterRule::default()
            },
        );
        let rule = store.resolve_or_create("app1", &levels(&["INFO"]));
        assert_eq!(rule.default_levels, levels(&["ERROR"]));
    }

    #[test]
    fn test_concurrent_resolution_creates_one_rule() {
        let source = Arc::new(InMemoryFilterSource::new());
        let (service, handle) = PersisterService::new(source, "cl1".to_string());
        let store = Arc::new(RuleStore::new(Some(handle)));
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let workers: Vec<_> = (0..threads)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.resolve_or_create("app1", &[format!("LEVEL{i}")])
                })
            })
            .collect();
        let results: Vec<Arc<FilterRule>> =
            workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_eq!(store.len(), 1);
        let stored = store.get("app1").unwrap();
        for rule in &results {
            assert!(Arc::ptr_eq(rule, &stored));
        }

        // Exactly one persistence request was queued.
        drop(store);
        let mut rx = service.into_receiver();
        let mut creates = 0;
        while let Ok(PersistCommand::Create { log_id, .. }) = rx.try_recv() {
            assert_eq!(log_id, "app1");
            creates += 1;
        }
        assert_eq!(creates, 1);
    }

    #[test]
    fn test_failed_persistence_still_stores_rule() {
        let source = Arc::new(InMemoryFilterSource::new());
        let (service, handle) = PersisterService::new(source, "cl1".to_string());
        drop(service);
        let store = RuleStore::new(Some(handle));

        let rule = store.resolve_or_create("app1", &levels(&["INFO"]));

        assert_eq!(rule.label, "app1");
        assert_eq!(rule.default_levels, levels(&["INFO"]));
        let stored = store.get("app1").unwrap();
        assert!(Arc::ptr_eq(&rule, &stored));
        // Later lookups reuse the stored rule instead of retrying synthesis
        assert!(Arc::ptr_eq(
            &store.resolve_or_create("app1", &levels(&["ERROR"])),
            &stored
        ));
    }

    #[test]
    fn test_put_is_last_write_wins() {
        let store = RuleStore::new(None);
        store.resolve_or_create("app1", &levels(&["INFO"]));
        store.put("app1", FilterRule::with_defaults("app1", &levels(&["ERROR"])));
        store.put("app1", FilterRule::with_defaults("app1", &levels(&["WARN"])));
        assert_eq!(store.get("app1").unwrap().default_levels, levels(&["WARN"]));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = RuleStore::new(None);
        store.put("app1", FilterRule::with_defaults("app1", &[]));
        assert!(store.remove("app1"));
        assert!(!store.remove("app1"));
        assert!(store.get("app1").is_none());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = RuleStore::new(None);
        store.put("app1", FilterRule::with_defaults("app1", &levels(&["INFO"])));

        let mut snapshot = store.snapshot();
        snapshot.get_mut("app1").unwrap().hosts.push("h1".to_string());
        snapshot.insert("app2".to_string(), FilterRule::default());

        assert!(store.get("app1").unwrap().hosts.is_empty());
        assert!(store.get("app2").is_none());
    }

    #[test]
    fn test_replace_all_drops_stale_ids() {
        let store = RuleStore::new(None);
        store.put("old", FilterRule::with_defaults("old", &[]));
        store.replace_all(BTreeMap::from([(
            "new".to_string(),
            FilterRule::with_defaults("new", &[]),
        )]));
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
    }
}
