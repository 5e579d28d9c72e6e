//! Field extraction from structured log records.

use serde_json::{Map, Value};

/// Record field holding the source host.
pub const HOST_FIELD: &str = "host";
/// Record field holding the log source identifier.
pub const LOG_ID_FIELD: &str = "type";
/// Record field holding the severity level.
pub const LEVEL_FIELD: &str = "level";

/// Row type whose records are never filtered.
pub const AUDIT_ROW_TYPE: &str = "audit";

/// Describes the input a record was read from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputContext {
    pub row_type: Option<String>,
}

impl InputContext {
    #[must_use]
    pub fn new(row_type: impl Into<String>) -> Self {
        Self {
            row_type: Some(row_type.into()),
        }
    }

    /// Audit records bypass level filtering entirely.
    #[must_use]
    pub fn is_exempt(&self) -> bool {
        self.row_type.as_deref() == Some(AUDIT_ROW_TYPE)
    }
}

/// The three scalars the gate needs out of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordFields<'a> {
    pub host: &'a str,
    pub log_id: &'a str,
    pub level: &'a str,
}

impl<'a> RecordFields<'a> {
    /// `None` unless host, log id and level are all non-blank strings.
    #[must_use]
    pub fn extract(record: &'a Map<String, Value>) -> Option<Self> {
        Some(Self {
            host: non_blank(record, HOST_FIELD)?,
            log_id: non_blank(record, LOG_ID_FIELD)?,
            level: non_blank(record, LEVEL_FIELD)?,
        })
    }
}

fn non_blank<'a>(record: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}
