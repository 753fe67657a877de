//! Serde helpers for the shop's JSON.

use serde::{de, Deserialize, Deserializer};

/// Deserialize a `u16` that the shop may send either as a number (`512`) or
/// as a numeric string (`"512"`).
pub fn lenient_u16<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n,
        Raw::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| de::Error::custom(format!("expected a numeric string, got {s:?}")))?,
    };
    u16::try_from(value).map_err(|_| de::Error::custom(format!("{value} is out of range")))
}
