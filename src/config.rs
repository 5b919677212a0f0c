// agent configuration, loaded from TOON text or built in code
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOON error: {0}")]
    Toon(String),

    #[error("invalid value: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid map: {0}")]
    Map(#[from] crate::core::graph::MapError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatConfig {
    pub explorer: ExplorerConfig,
    pub merge: MergeOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Fixed seed for the direction choices; `None` seeds from the OS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// How deeply rotation trials may nest inside one another before the
    /// innermost one is counted as failed.
    pub trial_depth_limit: usize,
    /// Check after every merge that nothing was lost and the maps agree,
    /// failing the merge otherwise. On unless a caller opts out.
    pub verify: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            trial_depth_limit: 4,
            verify: true,
        }
    }
}

impl RatConfig {
    pub fn from_toon(text: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value =
            toon_format::decode_default(text).map_err(|e| ConfigError::Toon(e.to_string()))?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_toon(&self) -> Result<String, ConfigError> {
        let value = serde_json::to_value(self)?;
        toon_format::encode_default(&value).map_err(|e| ConfigError::Toon(e.to_string()))
    }

    /// Explorer settings for the `index`th agent of a colony: a fixed seed
    /// is offset per agent so they do not all walk the same way.
    pub fn explorer_for(&self, index: usize) -> ExplorerConfig {
        ExplorerConfig {
            seed: self.explorer.seed.map(|s| s.wrapping_add(index as u64)),
        }
    }
}
