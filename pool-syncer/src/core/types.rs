//! Core chain types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::plutus::PlutusData;

/// Unit string of the chain's native asset
pub const NATIVE_UNIT: &str = "lovelace";

/// Length of a policy id in hex characters
pub const POLICY_ID_HEX_LEN: usize = 56;

/// A position on the chain: a `(slot, block hash)` pair or genesis
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "PointRepr", into = "PointRepr")]
pub enum Point {
    Origin,
    Specific { slot: u64, id: String },
}

impl Point {
    pub fn new(slot: u64, id: impl Into<String>) -> Self {
        Point::Specific { slot, id: id.into() }
    }

    /// Slot of the point, 0 for `Origin`
    pub fn slot(&self) -> u64 {
        match self {
            Point::Origin => 0,
            Point::Specific { slot, .. } => *slot,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Point::Origin => None,
            Point::Specific { id, .. } => Some(id),
        }
    }

    pub fn is_origin(&self) -> bool {
        matches!(self, Point::Origin)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Point::Origin => write!(f, "origin"),
            Point::Specific { slot, id } => write!(f, "{}.{}", slot, id),
        }
    }
}

/// Wire shape of a point: the string `"origin"` or `{ "slot": .., "id": ".." }`
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PointRepr {
    Origin(OriginTag),
    Specific { slot: u64, id: String },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OriginTag {
    Origin,
}

impl From<PointRepr> for Point {
    fn from(repr: PointRepr) -> Self {
        match repr {
            PointRepr::Origin(OriginTag::Origin) => Point::Origin,
            PointRepr::Specific { slot, id } => Point::Specific { slot, id },
        }
    }
}

impl From<Point> for PointRepr {
    fn from(point: Point) -> Self {
        match point {
            Point::Origin => PointRepr::Origin(OriginTag::Origin),
            Point::Specific { slot, id } => PointRepr::Specific { slot, id },
        }
    }
}

/// Asset unit: policy id followed by the hex asset name, or `lovelace`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetUnit(String);

impl AssetUnit {
    pub fn native() -> Self {
        AssetUnit(NATIVE_UNIT.to_string())
    }

    pub fn new(policy_id: &str, asset_name: &str) -> Self {
        if policy_id.is_empty() && asset_name.is_empty() {
            return Self::native();
        }
        AssetUnit(format!("{}{}", policy_id, asset_name).to_lowercase())
    }

    pub fn parse(unit: &str) -> Self {
        if unit == NATIVE_UNIT || unit.is_empty() {
            Self::native()
        } else {
            AssetUnit(unit.to_lowercase())
        }
    }

    pub fn is_native(&self) -> bool {
        self.0 == NATIVE_UNIT
    }

    /// Policy id part, empty for the native asset
    pub fn policy_id(&self) -> &str {
        if self.is_native() {
            return "";
        }
        self.0.get(..POLICY_ID_HEX_LEN).unwrap_or(&self.0)
    }

    /// Hex asset name part, empty for the native asset
    pub fn asset_name(&self) -> &str {
        if self.is_native() {
            return "";
        }
        self.0.get(POLICY_ID_HEX_LEN..).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Asset bundle held by an output; units are unique
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(BTreeMap<AssetUnit, u64>);

impl Value {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, unit: AssetUnit, quantity: u64) -> Self {
        self.0.insert(unit, quantity);
        self
    }

    pub fn quantity_of(&self, unit: &AssetUnit) -> u64 {
        self.0.get(unit).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AssetUnit, u64)> {
        self.0.iter().map(|(unit, qty)| (unit, *qty))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(AssetUnit, u64)> for Value {
    fn from_iter<I: IntoIterator<Item = (AssetUnit, u64)>>(iter: I) -> Self {
        Value(iter.into_iter().collect())
    }
}

/// Datum attached to an output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datum {
    /// Only the hash is on the output; the datum lives in the witness set
    Hash(String),
    Inline(PlutusData),
}

/// Transaction output as delivered by the upstream node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Hex-encoded raw address bytes
    pub address: String,
    pub value: Value,
    #[serde(default)]
    pub datum: Option<Datum>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub outputs: Vec<TxOutput>,
    /// Witness datums keyed by datum hash
    #[serde(default)]
    pub datums: HashMap<String, PlutusData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub slot: u64,
    pub header_hash: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn point(&self) -> Point {
        Point::new(self.slot, self.header_hash.clone())
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            height: self.height,
            slot: self.slot,
            header_hash: self.header_hash.clone(),
        }
    }
}

/// Persisted block row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub slot: u64,
    pub header_hash: String,
}

impl BlockHeader {
    pub fn point(&self) -> Point {
        Point::new(self.slot, self.header_hash.clone())
    }
}

/// Identifies one produced output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxOutputRef {
    pub tx_hash: String,
    pub output_index: u32,
}

impl TxOutputRef {
    pub fn new(tx_hash: impl Into<String>, output_index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            output_index,
        }
    }
}

impl fmt::Display for TxOutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.output_index)
    }
}

/// Events delivered by the upstream chain-sync session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChainSyncEvent {
    RollForward(Block),
    RollBackward { point: Point, tip: Point },
}

/// Outcome of session negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intersection {
    pub point: Point,
    pub tip: Point,
}
