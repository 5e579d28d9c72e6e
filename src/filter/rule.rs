// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Wire format for `expiryTime`, always UTC.
pub const EXPIRY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Per log source admission rule.
///
/// Rules are shared as `Arc<FilterRule>` once they are in the store and are
/// never mutated there; updates replace the whole rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRule {
    #[serde(default)]
    pub label: String,
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub hosts: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub default_levels: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub override_levels: Vec<String>,
    #[serde(default, with = "expiry_time")]
    pub expiry_time: Option<DateTime<Utc>>,
}

/// Which hosts the override part of a rule applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostScope<'a> {
    /// No hosts listed: the override applies everywhere.
    All,
    Only(&'a [String]),
}

impl HostScope<'_> {
    #[must_use]
    pub fn contains(&self, host: &str) -> bool {
        match self {
            HostScope::All => true,
            HostScope::Only(hosts) => hosts.iter().any(|h| h == host),
        }
    }
}

impl FilterRule {
    /// Rule synthesized for a log source seen for the first time.
    #[must_use]
    pub fn with_defaults(label: &str, default_levels: &[String]) -> Self {
        FilterRule {
            label: label.to_string(),
            default_levels: default_levels.to_vec(),
            ..FilterRule::default()
        }
    }

    /// A rule carries an override when any of expiry, override levels or
    /// hosts is set. Otherwise only `default_levels` ever apply.
    #[must_use]
    pub fn has_override(&self) -> bool {
        self.expiry_time.is_some() || !self.override_levels.is_empty() || !self.hosts.is_empty()
    }

    #[must_use]
    pub fn host_scope(&self) -> HostScope<'_> {
        if self.hosts.is_empty() {
            HostScope::All
        } else {
            HostScope::Only(&self.hosts)
        }
    }
}

/// Listing of every rule of a cluster, as exchanged with the remote store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRuleMap {
    #[serde(default)]
    pub filter: BTreeMap<String, FilterRule>,
}

fn deserialize_null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

pub mod expiry_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::EXPIRY_TIME_FORMAT;

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => serializer.serialize_str(&time.format(EXPIRY_TIME_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        if let Ok(time) = NaiveDateTime::parse_from_str(raw, EXPIRY_TIME_FORMAT) {
            return Ok(Some(time.and_utc()));
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|time| Some(time.with_timezone(&Utc)))
            .map_err(|e| serde::de::Error::custom(format!("invalid expiryTime '{raw}': {e}")))
    }
}

/// Formats an expiry the same way it goes over the wire.
#[must_use]
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format(EXPIRY_TIME_FORMAT).to_string()
}

/// Parses a wire formatted expiry, mostly useful for fixtures.
#[must_use]
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, EXPIRY_TIME_FORMAT)
        .ok()
        .map(|time| time.and_utc())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_without_override_fields() {
        let rule = FilterRule::with_defaults("app1", &["INFO".to_string()]);
        assert_eq!(rule.label, "app1");
        assert!(!rule.has_override());
        assert_eq!(rule.host_scope(), HostScope::All);
    }

    #[test]
    fn test_any_override_field_marks_override() {
        let hosts_only = FilterRule {
            hosts: vec!["h1".to_string()],
            ..FilterRule::default()
        };
        let levels_only = FilterRule {
            override_levels: vec!["ERROR".to_string()],
            ..FilterRule::default()
        };
        let expiry_only = FilterRule {
            expiry_time: Some(Utc::now()),
            ..FilterRule::default()
        };
        assert!(hosts_only.has_override());
        assert!(levels_only.has_override());
        assert!(expiry_only.has_override());
    }

    #[test]
    fn test_host_scope_contains() {
        let rule = FilterRule {
            hosts: vec!["h1".to_string(), "h2".to_string()],
            ..FilterRule::default()
        };
        assert!(rule.host_scope().contains("h2"));
        assert!(!rule.host_scope().contains("h3"));
        assert!(HostScope::All.contains("anything"));
    }

    #[test]
    fn test_deserialize_wire_rule() {
        let rule: FilterRule = serde_json::from_str(
            r#"{"label":"hdfs_namenode","hosts":null,"defaultLevels":["INFO","WARN"],"overrideLevels":["ERROR"],"expiryTime":"2017-05-04T12:30:00.250"}"#,
        )
        .unwrap();
        assert!(rule.hosts.is_empty());
        assert_eq!(rule.default_levels, vec!["INFO", "WARN"]);
        assert_eq!(
            rule.expiry_time,
            Some(parse_time("2017-05-04T12:30:00.250").unwrap())
        );
    }

    #[test]
    fn test_deserialize_rfc3339_expiry() {
        let rule: FilterRule =
            serde_json::from_str(r#"{"label":"x","expiryTime":"2017-05-04T14:30:00+02:00"}"#)
                .unwrap();
        assert_eq!(
            format_time(&rule.expiry_time.unwrap()),
            "2017-05-04T12:30:00.000"
        );
    }

    #[test]
    fn test_invalid_expiry_is_rejected() {
        let result = serde_json::from_str::<FilterRule>(r#"{"label":"x","expiryTime":"soon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_uses_wire_format() {
        let rule = FilterRule {
            label: "app1".to_string(),
            expiry_time: parse_time("2024-01-02T03:04:05.006"),
            ..FilterRule::default()
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["expiryTime"], "2024-01-02T03:04:05.006");
        assert_eq!(json["defaultLevels"], serde_json::json!([]));
    }

    #[test]
    fn test_rule_map_listing() {
        let map: FilterRuleMap = serde_json::from_str(
            r#"{"filter":{"app1":{"label":"app1","defaultLevels":["INFO"]},"app2":{"label":"app2"}}}"#,
        )
        .unwrap();
        assert_eq!(map.filter.len(), 2);
        assert_eq!(map.filter["app1"].default_levels, vec!["INFO"]);
    }
}
