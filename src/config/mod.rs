pub mod filter_storage;
pub mod log_level;
pub mod log_level_filters;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Format, Yaml};
use figment::{Figment, providers::Env};
use serde::Deserialize;
use serde_aux::prelude::deserialize_bool_from_anything;

use crate::config::filter_storage::FilterStorage;
use crate::config::log_level::LogLevel;
use crate::config::log_level_filters::{
    default_log_levels, deserialize_levels, deserialize_log_level_filters,
};
use crate::filter::rule::FilterRule;

pub const CONFIG_FILE_NAME: &str = "levelgate.yaml";

#[derive(Debug, PartialEq, Deserialize, Clone)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct Config {
    pub log_level: LogLevel,
    /// Cluster whose filter rules are loaded and watched.
    pub cluster_name: String,
    /// Master switch for level filtering. When off, every record is admitted.
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub log_filter_enabled: bool,
    pub log_filter_storage: FilterStorage,
    /// Keep a local rule cache in sync with the remote store.
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub use_local_configs: bool,
    pub filter_store_url: Option<String>,
    /// Seconds between two polls of the remote store.
    pub filter_poll_interval: u64,
    /// Seconds to wait for the remote store at startup.
    pub filter_bootstrap_timeout: u64,
    #[serde(deserialize_with = "deserialize_levels")]
    pub default_log_levels: Vec<String>,
    /// Row type of the records read by this process; `audit` bypasses filtering.
    pub input_row_type: String,
    #[serde(deserialize_with = "deserialize_log_level_filters")]
    pub log_level_filters: BTreeMap<String, FilterRule>,
    pub https_proxy: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: LogLevel::default(),
            cluster_name: "cl1".to_string(),
            log_filter_enabled: false,
            log_filter_storage: FilterStorage::Local,
            use_local_configs: false,
            filter_store_url: None,
            filter_poll_interval: 30,
            filter_bootstrap_timeout: 30,
            default_log_levels: default_log_levels(),
            input_row_type: "service".to_string(),
            log_level_filters: BTreeMap::new(),
            https_proxy: None,
        }
    }
}

impl Config {
    /// Rules are watched only when they live remotely and a local cache is requested.
    #[must_use]
    pub fn should_watch_filters(&self) -> bool {
        self.log_filter_storage == FilterStorage::Remote && self.use_local_configs
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.filter_poll_interval.max(1))
    }

    #[must_use]
    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.filter_bootstrap_timeout)
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[allow(clippy::module_name_repetitions)]
pub fn get_config(config_directory: &Path) -> Result<Config, ConfigError> {
    let path = config_directory.join(CONFIG_FILE_NAME);

    let figment = Figment::new()
        .merge(Yaml::file(&path))
        .merge(Env::prefixed("LEVELGATE_"))
        .merge(Env::raw().only(&["HTTPS_PROXY"]));

    let mut config: Config = match figment.extract() {
        Ok(config) => config,
        Err(err) => {
            println!("Failed to parse levelgate config: {err}");
            return Err(ConfigError::ParseError(err.to_string()));
        }
    };

    // Prefer LEVELGATE_PROXY_HTTPS over HTTPS_PROXY
    if let Ok(https_proxy) = std::env::var("LEVELGATE_PROXY_HTTPS") {
        config.https_proxy = Some(https_proxy);
    }

    if config.cluster_name.trim().is_empty() {
        return Err(ConfigError::MissingField("cluster_name".to_string()));
    }

    if config.log_filter_storage == FilterStorage::Remote
        && config
            .filter_store_url
            .as_deref()
            .is_none_or(|url| url.trim().is_empty())
    {
        return Err(ConfigError::MissingField("filter_store_url".to_string()));
    }

    Ok(config)
}
