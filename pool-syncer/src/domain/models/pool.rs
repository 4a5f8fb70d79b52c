//! Pool snapshot domain models

use crate::core::{AssetUnit, PlutusData, TxOutputRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pool family a snapshot was decoded as
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PoolFamily {
    /// Constant-product pools of the first protocol version
    Legacy,
    /// Constant-product pools with datum-tracked reserves
    V2,
    Stable,
}

impl PoolFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolFamily::Legacy => "legacy",
            PoolFamily::V2 => "v2",
            PoolFamily::Stable => "stable",
        }
    }
}

impl fmt::Display for PoolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legacy constant-product pool state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyPoolSnapshot {
    pub pool_nft: AssetUnit,
    pub lp_asset: AssetUnit,
    pub asset_a: AssetUnit,
    pub asset_b: AssetUnit,
    pub reserve_a: u64,
    pub reserve_b: u64,
    pub total_liquidity: u64,
    pub root_k_last: u64,
    /// Profit-sharing destination, kept in its datum form
    pub profit_sharing: Option<PlutusData>,
    pub provenance: TxOutputRef,
    pub pool_address: String,
    pub raw_datum: PlutusData,
}

/// V2 constant-product pool state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct V2PoolSnapshot {
    pub lp_asset: AssetUnit,
    pub asset_a: AssetUnit,
    pub asset_b: AssetUnit,
    pub reserve_a: u64,
    pub reserve_b: u64,
    pub total_liquidity: u64,
    pub base_fee_a_numerator: u64,
    pub base_fee_b_numerator: u64,
    pub fee_sharing_numerator: Option<u64>,
    pub allow_dynamic_fee: bool,
    pub provenance: TxOutputRef,
    pub pool_address: String,
    pub raw_datum: PlutusData,
}

/// Stableswap pool state over a basket of assets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StablePoolSnapshot {
    pub pool_nft: AssetUnit,
    pub lp_asset: AssetUnit,
    pub assets: Vec<AssetUnit>,
    /// Balances in the same order as `assets`
    pub balances: Vec<u64>,
    pub total_liquidity: u64,
    pub amplification_coefficient: u64,
    pub order_hash: String,
    pub provenance: TxOutputRef,
    pub pool_address: String,
    pub raw_datum: PlutusData,
}

/// "This pool had these reserves as of this output"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum PoolSnapshot {
    Legacy(LegacyPoolSnapshot),
    V2(V2PoolSnapshot),
    Stable(StablePoolSnapshot),
}

impl PoolSnapshot {
    pub fn family(&self) -> PoolFamily {
        match self {
            PoolSnapshot::Legacy(_) => PoolFamily::Legacy,
            PoolSnapshot::V2(_) => PoolFamily::V2,
            PoolSnapshot::Stable(_) => PoolFamily::Stable,
        }
    }

    pub fn lp_asset(&self) -> &AssetUnit {
        match self {
            PoolSnapshot::Legacy(p) => &p.lp_asset,
            PoolSnapshot::V2(p) => &p.lp_asset,
            PoolSnapshot::Stable(p) => &p.lp_asset,
        }
    }

    /// Traded assets; a normalized pair for constant-product pools
    pub fn assets(&self) -> Vec<&AssetUnit> {
        match self {
            PoolSnapshot::Legacy(p) => vec![&p.asset_a, &p.asset_b],
            PoolSnapshot::V2(p) => vec![&p.asset_a, &p.asset_b],
            PoolSnapshot::Stable(p) => p.assets.iter().collect(),
        }
    }

    /// Reserves in the same order as `assets()`
    pub fn reserves(&self) -> Vec<u64> {
        match self {
            PoolSnapshot::Legacy(p) => vec![p.reserve_a, p.reserve_b],
            PoolSnapshot::V2(p) => vec![p.reserve_a, p.reserve_b],
            PoolSnapshot::Stable(p) => p.balances.clone(),
        }
    }

    pub fn total_liquidity(&self) -> u64 {
        match self {
            PoolSnapshot::Legacy(p) => p.total_liquidity,
            PoolSnapshot::V2(p) => p.total_liquidity,
            PoolSnapshot::Stable(p) => p.total_liquidity,
        }
    }

    pub fn provenance(&self) -> &TxOutputRef {
        match self {
            PoolSnapshot::Legacy(p) => &p.provenance,
            PoolSnapshot::V2(p) => &p.provenance,
            PoolSnapshot::Stable(p) => &p.provenance,
        }
    }

    pub fn pool_address(&self) -> &str {
        match self {
            PoolSnapshot::Legacy(p) => &p.pool_address,
            PoolSnapshot::V2(p) => &p.pool_address,
            PoolSnapshot::Stable(p) => &p.pool_address,
        }
    }

    pub fn raw_datum(&self) -> &PlutusData {
        match self {
            PoolSnapshot::Legacy(p) => &p.raw_datum,
            PoolSnapshot::V2(p) => &p.raw_datum,
            PoolSnapshot::Stable(p) => &p.raw_datum,
        }
    }
}
