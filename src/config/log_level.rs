use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;
use tracing::level_filters::LevelFilter;

/// Crates whose own diagnostics never reach our output.
const SILENCED_TARGETS: [&str; 4] = ["h2", "hyper", "rustls", "reqwest"];

/// Verbosity of levelgate's own diagnostics on stderr.
///
/// Not to be confused with the severity levels carried by filtered records,
/// which are free-form strings matched verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// `EnvFilter` directives: noisy dependencies off, everything else at `self`.
    #[must_use]
    pub fn env_filter_directives(self) -> String {
        let mut directives: Vec<String> = SILENCED_TARGETS
            .iter()
            .map(|target| format!("{target}=off"))
            .collect();
        directives.push(self.as_level_filter().to_string());
        directives.join(",")
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_level_filter(), f)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!(
                "Invalid log level: '{other}'. Valid levels are: error, warn, info, debug, trace",
            )),
        }
    }
}

// An unusable level must not stop the process; it falls back to warn.
impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level = match Value::deserialize(deserializer)? {
            Value::String(s) => s.parse().unwrap_or_else(|e: String| {
                error!("{e}");
                LogLevel::default()
            }),
            other => {
                error!("Expected a string for log level, got {other}");
                LogLevel::default()
            }
        };
        Ok(level)
    }
}
