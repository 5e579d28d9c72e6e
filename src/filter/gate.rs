// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::filter::clock::Clock;
use crate::filter::policy;
use crate::filter::record::{InputContext, RecordFields};
use crate::filter::rule::FilterRule;
use crate::filter::store::RuleStore;

/// Per record entry point of log level filtering.
///
/// Every path through the gate fails open: whenever a decision cannot be
/// made confidently the record is allowed.
#[derive(Debug)]
pub struct AdmissionGate {
    store: Arc<RuleStore>,
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
}

impl AdmissionGate {
    #[must_use]
    pub fn new(store: Arc<RuleStore>, clock: Arc<dyn Clock>, enabled: bool) -> Self {
        Self {
            store,
            clock,
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Turns filtering on or off for every subsequent call.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Whether a record of `level` from `log_id` on `host` may pass.
    ///
    /// Unknown log ids get a default rule built from `default_levels`.
    pub fn is_allowed(&self, host: &str, log_id: &str, level: &str, default_levels: &[String]) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let rule = self.store.resolve_or_create(log_id, default_levels);
        let allowed = policy::evaluate(&rule, host, self.clock.now());
        policy::permits(allowed, level)
    }

    /// Record flavour of [`AdmissionGate::is_allowed`].
    ///
    /// Exempt inputs pass even when filtering is enabled; records without
    /// usable host, type and level fields pass as well.
    pub fn is_allowed_record(
        &self,
        record: &Map<String, Value>,
        input: &InputContext,
        default_levels: &[String],
    ) -> bool {
        if input.is_exempt() {
            return true;
        }

        let allowed = self.apply_filter(record, default_levels);
        if !allowed {
            let content = serde_json::Value::Object(record.clone());
            trace!("LOG_FILTER | Filter block the content: {content}");
        }
        allowed
    }

    /// Raw JSON flavour of [`AdmissionGate::is_allowed_record`].
    pub fn is_allowed_json(&self, block: &str, input: &InputContext, default_levels: &[String]) -> bool {
        if block.trim().is_empty() {
            return true;
        }

        match serde_json::from_str::<Map<String, Value>>(block) {
            Ok(record) => self.is_allowed_record(&record, input, default_levels),
            Err(e) => {
                warn!("LOG_FILTER | Could not parse record, letting it through: {e}");
                true
            }
        }
    }

    fn apply_filter(&self, record: &Map<String, Value>, default_levels: &[String]) -> bool {
        if record.is_empty() {
            warn!("LOG_FILTER | Output record is empty");
            return true;
        }

        match RecordFields::extract(record) {
            Some(fields) => self.is_allowed(fields.host, fields.log_id, fields.level, default_levels),
            None => true,
        }
    }

    pub fn set_rule(&self, log_id: &str, rule: FilterRule) {
        self.store.put(log_id, rule);
    }

    pub fn remove_rule(&self, log_id: &str) -> bool {
        self.store.remove(log_id)
    }

    #[must_use]
    pub fn list_rules(&self) -> BTreeMap<String, FilterRule> {
        self.store.snapshot()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }
}
