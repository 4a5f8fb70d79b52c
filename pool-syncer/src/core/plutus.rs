//! Structured datum values
//!
//! Datums arrive from the upstream node in the detailed JSON schema:
//! `{"constructor": n, "fields": [..]}`, `{"int": n}`, `{"bytes": "hex"}`,
//! `{"list": [..]}` and `{"map": [{"k": .., "v": ..}]}`. Integers are
//! unbounded; those that do not fit in 64 bits are written as decimal strings.

use serde::de::Error as _;
use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use num_bigint::BigInt;
use serde_json::Value as Json;

use super::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlutusData {
    Constr { tag: u64, fields: Vec<PlutusData> },
    Int(BigInt),
    Bytes(Vec<u8>),
    List(Vec<PlutusData>),
    Map(Vec<(PlutusData, PlutusData)>),
}

impl PlutusData {
    pub fn constr(tag: u64, fields: Vec<PlutusData>) -> Self {
        PlutusData::Constr { tag, fields }
    }

    pub fn int(value: impl Into<BigInt>) -> Self {
        PlutusData::Int(value.into())
    }

    pub fn bytes_hex(hex_str: &str) -> Result<Self, DecodeError> {
        hex::decode(hex_str)
            .map(PlutusData::Bytes)
            .map_err(|e| DecodeError::InvalidDatum(format!("invalid bytes {}: {}", hex_str, e)))
    }

    /// Fields of a constructor with the expected tag and arity
    pub fn expect_constr(&self, tag: u64, arity: usize, what: &str) -> Result<&[PlutusData], DecodeError> {
        match self {
            PlutusData::Constr { tag: t, fields } if *t == tag && fields.len() == arity => Ok(fields),
            PlutusData::Constr { tag: t, fields } => Err(DecodeError::InvalidDatum(format!(
                "{}: expected constructor {} with {} fields, found constructor {} with {} fields",
                what,
                tag,
                arity,
                t,
                fields.len()
            ))),
            other => Err(DecodeError::InvalidDatum(format!(
                "{}: expected constructor, found {}",
                what,
                other.kind()
            ))),
        }
    }

    pub fn expect_int(&self, what: &str) -> Result<&BigInt, DecodeError> {
        match self {
            PlutusData::Int(v) => Ok(v),
            other => Err(DecodeError::InvalidDatum(format!("{}: expected int, found {}", what, other.kind()))),
        }
    }

    /// Non-negative integer that fits an on-chain quantity
    pub fn expect_quantity(&self, what: &str) -> Result<u64, DecodeError> {
        let v = self.expect_int(what)?;
        u64::try_from(v).map_err(|_| DecodeError::InvalidDatum(format!("{}: {} is not a valid quantity", what, v)))
    }

    pub fn expect_bytes(&self, what: &str) -> Result<&[u8], DecodeError> {
        match self {
            PlutusData::Bytes(b) => Ok(b),
            other => Err(DecodeError::InvalidDatum(format!("{}: expected bytes, found {}", what, other.kind()))),
        }
    }

    pub fn expect_list(&self, what: &str) -> Result<&[PlutusData], DecodeError> {
        match self {
            PlutusData::List(items) => Ok(items),
            other => Err(DecodeError::InvalidDatum(format!("{}: expected list, found {}", what, other.kind()))),
        }
    }

    /// `False` is constructor 0, `True` is constructor 1, both without fields
    pub fn expect_bool(&self, what: &str) -> Result<bool, DecodeError> {
        match self {
            PlutusData::Constr { tag: 0, fields } if fields.is_empty() => Ok(false),
            PlutusData::Constr { tag: 1, fields } if fields.is_empty() => Ok(true),
            other => Err(DecodeError::InvalidDatum(format!("{}: expected bool, found {}", what, other.kind()))),
        }
    }

    /// `Some(x)` is constructor 0 `[x]`, `None` is constructor 1 `[]`
    pub fn expect_option(&self, what: &str) -> Result<Option<&PlutusData>, DecodeError> {
        match self {
            PlutusData::Constr { tag: 0, fields } if fields.len() == 1 => Ok(fields.first()),
            PlutusData::Constr { tag: 1, fields } if fields.is_empty() => Ok(None),
            other => Err(DecodeError::InvalidDatum(format!("{}: expected optional, found {}", what, other.kind()))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PlutusData::Constr { .. } => "constructor",
            PlutusData::Int(_) => "int",
            PlutusData::Bytes(_) => "bytes",
            PlutusData::List(_) => "list",
            PlutusData::Map(_) => "map",
        }
    }

    pub fn to_json(&self) -> Json {
        // Serializing into a serde_json::Value cannot fail for this type
        serde_json::to_value(self).unwrap_or(Json::Null)
    }
}

impl Serialize for PlutusData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PlutusData::Constr { tag, fields } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("constructor", tag)?;
                map.serialize_entry("fields", fields)?;
                map.end()
            }
            PlutusData::Int(v) => {
                let mut map = serializer.serialize_map(Some(1))?;
                if let Ok(small) = i64::try_from(v) {
                    map.serialize_entry("int", &small)?;
                } else if let Ok(large) = u64::try_from(v) {
                    map.serialize_entry("int", &large)?;
                } else {
                    map.serialize_entry("int", &v.to_string())?;
                }
                map.end()
            }
            PlutusData::Bytes(b) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("bytes", &hex::encode(b))?;
                map.end()
            }
            PlutusData::List(items) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("list", items)?;
                map.end()
            }
            PlutusData::Map(entries) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("map", &MapEntries(entries))?;
                map.end()
            }
        }
    }
}

struct MapEntries<'a>(&'a [(PlutusData, PlutusData)]);

impl Serialize for MapEntries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (k, v) in self.0 {
            let entry = serde_json::json!({
                "k": serde_json::to_value(k).map_err(S::Error::custom)?,
                "v": serde_json::to_value(v).map_err(S::Error::custom)?,
            });
            seq.serialize_element(&entry)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for PlutusData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        PlutusData::try_from(&json).map_err(D::Error::custom)
    }
}

impl TryFrom<&Json> for PlutusData {
    type Error = DecodeError;

    fn try_from(json: &Json) -> Result<Self, Self::Error> {
        let obj = json
            .as_object()
            .ok_or_else(|| DecodeError::InvalidDatum(format!("expected object, found {}", json)))?;

        if let Some(tag) = obj.get("constructor") {
            let tag = tag
                .as_u64()
                .ok_or_else(|| DecodeError::InvalidDatum(format!("invalid constructor tag {}", tag)))?;
            let fields = obj
                .get("fields")
                .and_then(Json::as_array)
                .ok_or_else(|| DecodeError::InvalidDatum("constructor without fields".to_string()))?
                .iter()
                .map(PlutusData::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(PlutusData::Constr { tag, fields });
        }
        if let Some(int) = obj.get("int") {
            let value = match int {
                Json::Number(n) => n
                    .as_i64()
                    .map(BigInt::from)
                    .or_else(|| n.as_u64().map(BigInt::from))
                    .or_else(|| n.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0).and_then(big_from_f64)),
                Json::String(s) => s.parse::<BigInt>().ok(),
                _ => None,
            };
            return value
                .map(PlutusData::Int)
                .ok_or_else(|| DecodeError::InvalidDatum(format!("invalid int {}", int)));
        }
        if let Some(bytes) = obj.get("bytes") {
            let hex_str = bytes
                .as_str()
                .ok_or_else(|| DecodeError::InvalidDatum(format!("invalid bytes {}", bytes)))?;
            return PlutusData::bytes_hex(hex_str);
        }
        if let Some(list) = obj.get("list") {
            let items = list
                .as_array()
                .ok_or_else(|| DecodeError::InvalidDatum(format!("invalid list {}", list)))?
                .iter()
                .map(PlutusData::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(PlutusData::List(items));
        }
        if let Some(map) = obj.get("map") {
            let entries = map
                .as_array()
                .ok_or_else(|| DecodeError::InvalidDatum(format!("invalid map {}", map)))?
                .iter()
                .map(|entry| {
                    let k = entry
                        .get("k")
                        .ok_or_else(|| DecodeError::InvalidDatum("map entry without key".to_string()))?;
                    let v = entry
                        .get("v")
                        .ok_or_else(|| DecodeError::InvalidDatum("map entry without value".to_string()))?;
                    Ok((PlutusData::try_from(k)?, PlutusData::try_from(v)?))
                })
                .collect::<Result<Vec<_>, DecodeError>>()?;
            return Ok(PlutusData::Map(entries));
        }

        Err(DecodeError::InvalidDatum(format!("unrecognized datum shape {}", json)))
    }
}

/// JSON numbers beyond 64 bits arrive as floats; keep their integral value
fn big_from_f64(value: f64) -> Option<BigInt> {
    format!("{:.0}", value).parse().ok()
}
