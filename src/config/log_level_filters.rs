use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

use crate::filter::rule::FilterRule;

/// Levels shipped for a log source nobody configured a rule for.
pub const DEFAULT_LOG_LEVELS: [&str; 7] =
    ["FATAL", "ERROR", "WARN", "INFO", "DEBUG", "TRACE", "UNKNOWN"];

#[must_use]
pub fn default_log_levels() -> Vec<String> {
    DEFAULT_LOG_LEVELS.iter().map(ToString::to_string).collect()
}

/// Accepts either a comma separated string or a list of strings.
pub fn deserialize_levels<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: JsonValue = Deserialize::deserialize(deserializer)?;

    match value {
        JsonValue::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|level| !level.is_empty())
            .map(ToString::to_string)
            .collect()),
        JsonValue::Array(a) => Ok(a
            .into_iter()
            .filter_map(|v| match v {
                JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                other => {
                    tracing::error!("Failed to parse log level {}, ignoring", other);
                    None
                }
            })
            .collect()),
        _ => {
            tracing::error!("Failed to parse log levels, using defaults");
            Ok(default_log_levels())
        }
    }
}

/// Accepts either a JSON string or a map of log id to rule.
///
/// Invalid rules are logged and skipped; a missing label is filled in with
/// the log id.
pub fn deserialize_log_level_filters<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, FilterRule>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: JsonValue = Deserialize::deserialize(deserializer)?;

    let entries = match value {
        JsonValue::String(s) => match serde_json::from_str::<serde_json::Map<String, JsonValue>>(&s)
        {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Failed to parse log level filters: {}, ignoring", e);
                return Ok(BTreeMap::new());
            }
        },
        JsonValue::Object(entries) => entries,
        _ => return Ok(BTreeMap::new()),
    };

    let mut filters = BTreeMap::new();
    for (log_id, v) in entries {
        match serde_json::from_value::<FilterRule>(v) {
            Ok(mut rule) => {
                if rule.label.is_empty() {
                    rule.label.clone_from(&log_id);
                }
                filters.insert(log_id, rule);
            }
            Err(e) => {
                tracing::error!("Failed to parse log level filter {}: {}, ignoring", log_id, e);
            }
        }
    }
    Ok(filters)
}
