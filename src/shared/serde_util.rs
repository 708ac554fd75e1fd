//! Custom serde helpers for feed wire formats.

/// Deserializes a Unix-millis integer into `DateTime<Utc>`.
///
/// The feed sends tick timestamps as epoch milliseconds, not ISO 8601 strings.
pub mod timestamp_ms {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid timestamp: {}", millis)))
    }
}

/// Deserializes a decimal sent either as a JSON number or a decimal string.
///
/// Upstream sources disagree on the encoding of prices (`1.25` vs `"1.25"`).
pub mod lenient_decimal {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer};
    use std::str::FromStr;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Str(String),
        Int(i64),
        Float(f64),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Str(s) => Decimal::from_str(s.trim())
                .map_err(|e| serde::de::Error::custom(format!("Invalid decimal '{}': {}", s, e))),
            NumberOrString::Int(i) => Ok(Decimal::from(i)),
            NumberOrString::Float(f) => Decimal::try_from(f)
                .map_err(|e| serde::de::Error::custom(format!("Invalid decimal {}: {}", f, e))),
        }
    }
}
