//! Snowflake ids travel as JSON strings so JavaScript clients never lose
//! precision. Deserialization also accepts bare numbers.

use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_id<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            RawId::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid id '{text}'"))),
            RawId::Number(n) => Ok(n),
        }
    }
}

pub fn serialize<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    RawId::deserialize(deserializer)?.into_id()
}

pub mod list {
    use super::RawId;
    use serde::{ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ids: &[i64], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(ids.len()))?;
        for id in ids {
            seq.serialize_element(&id.to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i64>, D::Error> {
        Vec::<RawId>::deserialize(deserializer)?
            .into_iter()
            .map(RawId::into_id)
            .collect()
    }
}
