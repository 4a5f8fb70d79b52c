//! Per-network pool recognition data
//!
//! Script hashes and policy ids the decoder matches against. This is
//! configuration, not behavior: test networks supply it through the
//! `[pools]` section of the config file.

use crate::core::AssetUnit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network the syncer follows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkEnvironment {
    #[default]
    Mainnet,
    Preprod,
    Preview,
}

impl NetworkEnvironment {
    /// Maximum rollback depth in blocks
    pub fn security_param(&self) -> usize {
        match self {
            NetworkEnvironment::Mainnet | NetworkEnvironment::Preprod => 2160,
            NetworkEnvironment::Preview => 432,
        }
    }
}

impl fmt::Display for NetworkEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkEnvironment::Mainnet => write!(f, "mainnet"),
            NetworkEnvironment::Preprod => write!(f, "preprod"),
            NetworkEnvironment::Preview => write!(f, "preview"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegacyPoolConfig {
    pub script_hash: String,
    /// Policy of the per-pool identity NFT
    pub nft_policy: String,
    pub lp_policy: String,
    pub factory_policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct V2PoolConfig {
    pub script_hash: String,
    /// Policy minting both LP tokens and the pool validity asset
    pub lp_policy: String,
    pub validity_asset_name: String,
}

impl V2PoolConfig {
    pub fn validity_asset(&self) -> AssetUnit {
        AssetUnit::new(&self.lp_policy, &self.validity_asset_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StablePoolConfig {
    pub script_hash: String,
    pub nft_asset: AssetUnit,
    pub lp_asset: AssetUnit,
    /// Basket in datum balance order
    pub assets: Vec<AssetUnit>,
}

/// Everything the decoder needs to know about one network
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkContext {
    #[serde(default)]
    pub legacy: Option<LegacyPoolConfig>,
    #[serde(default)]
    pub v2: Option<V2PoolConfig>,
    #[serde(default)]
    pub stable: Vec<StablePoolConfig>,
}

impl NetworkContext {
    /// Built-in recognition data; only mainnet ships one
    pub fn builtin(network: NetworkEnvironment) -> Option<Self> {
        match network {
            NetworkEnvironment::Mainnet => Some(Self {
                legacy: Some(LegacyPoolConfig {
                    script_hash: "e1317b152faac13426e6a83e06ff88a4d62cce3c1634ab0a5ec13309".to_string(),
                    nft_policy: "0be55d262b29f564998ff81efe21bdc0022621c12f15af08d0f2ddb1".to_string(),
                    lp_policy: "e4214b7cce62ac6fbba385d164df48e157eae5863521b4b67ca71d86".to_string(),
                    factory_policy: "13aa2accf2e1561723aa26871e071fdf32c867cff7e7d50ad470d62f".to_string(),
                }),
                v2: Some(V2PoolConfig {
                    script_hash: "ea07b733d932129c378af627436e7cbc2ef0bf96e0036bb51b3bde6b".to_string(),
                    lp_policy: "f5808c2c990d86da54bfc97d89cee6efa20cd8461616359478d96b4c".to_string(),
                    validity_asset_name: "4d5350".to_string(),
                }),
                stable: Vec::new(),
            }),
            NetworkEnvironment::Preprod | NetworkEnvironment::Preview => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.legacy.is_none() && self.v2.is_none() && self.stable.is_empty()
    }

    /// Stable pool configurations sharing a script hash
    pub fn stable_pools_for<'a>(&'a self, script_hash: &'a str) -> impl Iterator<Item = &'a StablePoolConfig> + 'a {
        self.stable.iter().filter(move |p| p.script_hash == script_hash)
    }
}
