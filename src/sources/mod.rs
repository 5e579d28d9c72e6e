// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backing stores that share filter rules between cooperating processes.
//!
//! The core only sees the narrow [`FilterSource`] capability; each backend
//! decides how it reads, creates and watches rules.

pub mod http;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::filter::rule::FilterRule;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("filter store is unavailable: {0}")]
    Unavailable(String),
    #[error("filter store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("filter store answered with status {0}")]
    Status(u16),
}

/// Change notification for a single log source id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterEvent {
    Created { log_id: String, rule: FilterRule },
    Updated { log_id: String, rule: FilterRule },
    Removed { log_id: String },
}

#[async_trait]
pub trait FilterSource: Send + Sync + Debug {
    /// Resolves once the store root for `cluster` answers.
    async fn wait_until_available(&self, cluster: &str) -> Result<(), SourceError>;

    /// Every rule currently stored for `cluster`.
    async fn get_filters(&self, cluster: &str) -> Result<BTreeMap<String, FilterRule>, SourceError>;

    /// Creates `rule` under `log_id` unless one already exists.
    async fn create_filter(
        &self,
        cluster: &str,
        log_id: &str,
        rule: &FilterRule,
    ) -> Result<(), SourceError>;

    /// Stream of changes for `cluster`, ordered per log id.
    async fn subscribe(
        &self,
        cluster: &str,
    ) -> Result<mpsc::UnboundedReceiver<FilterEvent>, SourceError>;
}

/// Events turning `old` into `new`, in log id order.
#[must_use]
pub fn diff_filters(
    old: &BTreeMap<String, FilterRule>,
    new: &BTreeMap<String, FilterRule>,
) -> Vec<FilterEvent> {
    let mut events = Vec::new();

    for log_id in old.keys() {
        if !new.contains_key(log_id) {
            events.push(FilterEvent::Removed {
                log_id: log_id.clone(),
            });
        }
    }

    for (log_id, rule) in new {
        match old.get(log_id) {
            None => events.push(FilterEvent::Created {
                log_id: log_id.clone(),
                rule: rule.clone(),
            }),
            Some(previous) if previous != rule => events.push(FilterEvent::Updated {
                log_id: log_id.clone(),
                rule: rule.clone(),
            }),
            Some(_) => {}
        }
    }

    events
}
