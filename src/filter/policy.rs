// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decides which severity levels a rule currently allows for a host.
//!
//! Evaluation is a pure function of the rule, the requesting host and the
//! instant supplied by the caller. The stored rule is only ever borrowed.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::filter::rule::{FilterRule, format_time};

/// Levels currently allowed by `rule` for `host` at `now`.
///
/// An empty slice means "no restriction".
#[must_use]
pub fn evaluate<'a>(rule: &'a FilterRule, host: &str, now: DateTime<Utc>) -> &'a [String] {
    if !rule.has_override() {
        return &rule.default_levels;
    }

    if !rule.host_scope().contains(host) {
        return &rule.default_levels;
    }

    if is_expired(rule, now) {
        debug!(
            "LOG_FILTER | Filter for component {} and host {} is expired at {}",
            rule.label,
            host,
            rule.expiry_time.as_ref().map(format_time).unwrap_or_default()
        );
        return &rule.default_levels;
    }

    &rule.override_levels
}

/// An override expires once `now` is no longer strictly before its expiry.
#[must_use]
pub fn is_expired(rule: &FilterRule, now: DateTime<Utc>) -> bool {
    match rule.expiry_time {
        Some(expiry) if now >= expiry => {
            debug!(
                "LOG_FILTER | Filter for component {} and hosts [{}] is expired because of filter end time {} is older than current time {}",
                rule.label,
                rule.hosts.join(","),
                format_time(&expiry),
                format_time(&now)
            );
            true
        }
        _ => false,
    }
}

/// Whether `level` passes the evaluated level list.
#[must_use]
pub fn permits(allowed: &[String], level: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|l| l == level)
}
