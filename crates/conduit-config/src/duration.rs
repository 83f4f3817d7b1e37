use std::time::Duration;

use serde::{Deserialize, Deserializer, de::Error as _};

/// Deserialize a human duration such as `"500ms"` or `"1m"`
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    duration_str::parse(&raw).map_err(|e| D::Error::custom(format!("invalid duration '{raw}': {e}")))
}

pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    duration_str::parse(&raw)
        .map(Some)
        .map_err(|e| D::Error::custom(format!("invalid duration '{raw}': {e}")))
}
