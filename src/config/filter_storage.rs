use serde::{Deserialize, Deserializer};
use tracing::debug;

/// Where filter rules are kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FilterStorage {
    /// In-process only, seeded from the configuration file.
    #[default]
    Local,
    /// Shared with other processes through the remote configuration service.
    Remote,
}

// Filter storage is either "local" or "remote"; anything else falls back to local
impl<'de> Deserialize<'de> for FilterStorage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        match value.trim().to_lowercase().as_str() {
            "local" => Ok(FilterStorage::Local),
            "remote" => Ok(FilterStorage::Remote),
            _ => {
                debug!("Invalid filter storage: {}, using local", value);
                Ok(FilterStorage::Local)
            }
        }
    }
}
