//! Serde helpers for snowflake identifiers.
//!
//! Ids are 64-bit integers internally but travel over the wire as decimal
//! strings, since JavaScript clients cannot represent them exactly as numbers.
//! Incoming ids are accepted either as strings or as plain numbers.

use serde::{de, Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(i64),
    Str(String),
}

fn parse_raw<E: de::Error>(raw: RawId) -> Result<Option<i64>, E> {
    match raw {
        RawId::Num(n) => Ok(Some(n)),
        RawId::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<i64>()
                .map(Some)
                .map_err(|_| E::custom(format!("invalid id '{trimmed}'")))
        }
    }
}

pub fn serialize<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    parse_raw(RawId::deserialize(deserializer)?)?
        .ok_or_else(|| de::Error::custom("empty id"))
}

/// Optional ids. An empty string deserializes as `None` so that blank form
/// fields are reported as missing rather than malformed.
pub mod option {
    use super::{parse_raw, RawId};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.collect_str(id),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        match Option::<RawId>::deserialize(deserializer)? {
            Some(raw) => parse_raw(raw),
            None => Ok(None),
        }
    }
}
