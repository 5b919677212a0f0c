// TOON import/export of a local map, slots in the integer picture format
use crate::config::ConfigError;
use crate::core::graph::LocalMap;

pub fn to_toon(map: &LocalMap) -> Result<String, ConfigError> {
    let value = serde_json::to_value(map)?;
    toon_format::encode_default(&value).map_err(|e| ConfigError::Toon(e.to_string()))
}

/// Parse a map and check that every reference in it names a chamber it holds.
pub fn from_toon(text: &str) -> Result<LocalMap, ConfigError> {
    let value: serde_json::Value =
        toon_format::decode_default(text).map_err(|e| ConfigError::Toon(e.to_string()))?;
    let map: LocalMap = serde_json::from_value(value)?;
    map.validate()?;
    Ok(map)
}
