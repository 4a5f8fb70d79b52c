//! Output decoder
//!
//! Pure functions turning `(address, value, datum)` triples into typed pool
//! snapshots. Outputs at addresses of no known pool family decode to
//! `Ok(None)`; everything else either yields a snapshot or a per-output
//! [`DecodeError`] that the caller logs and skips.

pub mod address;
pub mod network;

pub use network::{LegacyPoolConfig, NetworkContext, NetworkEnvironment, StablePoolConfig, V2PoolConfig};

use crate::core::{AssetUnit, Block, Datum, DecodeError, PlutusData, Transaction, TxOutput, TxOutputRef, Value};
use crate::domain::models::{LegacyPoolSnapshot, PoolSnapshot, StablePoolSnapshot, V2PoolSnapshot};
use sha3::{Digest, Sha3_256};
use std::collections::HashMap;

/// Witness datums available to outputs that only carry a datum hash
#[derive(Debug, Default)]
pub struct DatumWitnesses<'a> {
    datums: HashMap<&'a str, &'a PlutusData>,
}

impl<'a> DatumWitnesses<'a> {
    pub fn from_block(block: &'a Block) -> Self {
        let datums = block
            .transactions
            .iter()
            .flat_map(|tx| tx.datums.iter())
            .map(|(hash, datum)| (hash.as_str(), datum))
            .collect();
        Self { datums }
    }

    pub fn from_transaction(tx: &'a Transaction) -> Self {
        let datums = tx.datums.iter().map(|(hash, datum)| (hash.as_str(), datum)).collect();
        Self { datums }
    }

    /// Resolve an output's datum, inline or by hash
    pub fn resolve<'s>(&'s self, datum: Option<&'s Datum>) -> Result<&'s PlutusData, DecodeError> {
        match datum {
            Some(Datum::Inline(data)) => Ok(data),
            Some(Datum::Hash(hash)) => self
                .datums
                .get(hash.as_str())
                .copied()
                .ok_or_else(|| DecodeError::MissingDatumWitness(hash.clone())),
            None => Err(DecodeError::MissingDatum),
        }
    }
}

/// Canonical pair ordering: the native asset first, otherwise lexicographic
/// on the unit string
pub fn normalize_asset_pair(a: AssetUnit, b: AssetUnit) -> (AssetUnit, AssetUnit) {
    if a.is_native() {
        (a, b)
    } else if b.is_native() || b < a {
        (b, a)
    } else {
        (a, b)
    }
}

/// Decoder bound to one network's recognition data
#[derive(Debug, Clone)]
pub struct PoolDecoder {
    context: NetworkContext,
}

impl PoolDecoder {
    pub fn new(context: NetworkContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &NetworkContext {
        &self.context
    }

    /// Decode one output. `Ok(None)` means the output is not at a pool address.
    pub fn decode(
        &self,
        output_ref: &TxOutputRef,
        output: &TxOutput,
        witnesses: &DatumWitnesses<'_>,
    ) -> Result<Option<PoolSnapshot>, DecodeError> {
        let script_hash = match address::payment_script_hash(&output.address)? {
            Some(hash) => hash,
            None => return Ok(None),
        };

        if let Some(cfg) = self.context.legacy.as_ref().filter(|c| c.script_hash == script_hash) {
            return decode_legacy(cfg, output_ref, output, witnesses).map(Some);
        }
        if let Some(cfg) = self.context.v2.as_ref().filter(|c| c.script_hash == script_hash) {
            return decode_v2(cfg, output_ref, output, witnesses).map(Some);
        }
        let stable: Vec<&StablePoolConfig> = self.context.stable_pools_for(&script_hash).collect();
        if !stable.is_empty() {
            return decode_stable(&stable, output_ref, output, witnesses).map(Some);
        }

        Ok(None)
    }
}

fn decode_legacy(
    cfg: &LegacyPoolConfig,
    output_ref: &TxOutputRef,
    output: &TxOutput,
    witnesses: &DatumWitnesses<'_>,
) -> Result<PoolSnapshot, DecodeError> {
    const FAMILY: &str = "legacy";

    let nfts: Vec<(&AssetUnit, u64)> = output
        .value
        .iter()
        .filter(|(unit, _)| unit.policy_id() == cfg.nft_policy)
        .collect();
    let pool_nft = match nfts.as_slice() {
        [(unit, 1)] => (*unit).clone(),
        other => {
            return Err(DecodeError::MissingMarker {
                family: FAMILY,
                found: marker_count(other),
            })
        }
    };

    let excluded = [cfg.nft_policy.as_str(), cfg.factory_policy.as_str(), cfg.lp_policy.as_str()];
    let (asset_a, asset_b) = tradable_pair(FAMILY, &output.value, |unit| excluded.contains(&unit.policy_id()))?;

    let datum = witnesses.resolve(output.datum.as_ref())?;
    let fields = datum.expect_constr(0, 5, "legacy pool datum")?;
    check_datum_pair(&fields[0], &fields[1], &asset_a, &asset_b)?;
    let total_liquidity = fields[2].expect_quantity("total liquidity")?;
    let root_k_last = fields[3].expect_quantity("root k last")?;
    let profit_sharing = fields[4].expect_option("profit sharing")?.cloned();

    Ok(PoolSnapshot::Legacy(LegacyPoolSnapshot {
        lp_asset: AssetUnit::new(&cfg.lp_policy, pool_nft.asset_name()),
        reserve_a: output.value.quantity_of(&asset_a),
        reserve_b: output.value.quantity_of(&asset_b),
        pool_nft,
        asset_a,
        asset_b,
        total_liquidity,
        root_k_last,
        profit_sharing,
        provenance: output_ref.clone(),
        pool_address: output.address.clone(),
        raw_datum: datum.clone(),
    }))
}

fn decode_v2(
    cfg: &V2PoolConfig,
    output_ref: &TxOutputRef,
    output: &TxOutput,
    witnesses: &DatumWitnesses<'_>,
) -> Result<PoolSnapshot, DecodeError> {
    const FAMILY: &str = "v2";

    let validity = cfg.validity_asset();
    let markers = output.value.quantity_of(&validity);
    if markers != 1 {
        return Err(DecodeError::MissingMarker {
            family: FAMILY,
            found: usize::try_from(markers).unwrap_or(usize::MAX),
        });
    }

    let (asset_a, asset_b) = tradable_pair(FAMILY, &output.value, |unit| unit.policy_id() == cfg.lp_policy)?;

    // [batching stake credential, asset A, asset B, total liquidity, reserve A,
    //  reserve B, base fee A, base fee B, fee sharing, allow dynamic fee]
    let datum = witnesses.resolve(output.datum.as_ref())?;
    let fields = datum.expect_constr(0, 10, "v2 pool datum")?;
    fields[0].expect_constr(0, 1, "batching stake credential")?;
    check_datum_pair(&fields[1], &fields[2], &asset_a, &asset_b)?;
    let total_liquidity = fields[3].expect_quantity("total liquidity")?;
    let reserve_a = fields[4].expect_quantity("reserve A")?;
    let reserve_b = fields[5].expect_quantity("reserve B")?;
    let base_fee_a_numerator = fields[6].expect_quantity("base fee A")?;
    let base_fee_b_numerator = fields[7].expect_quantity("base fee B")?;
    let fee_sharing_numerator = fields[8]
        .expect_option("fee sharing")?
        .map(|d| d.expect_quantity("fee sharing numerator"))
        .transpose()?;
    let allow_dynamic_fee = fields[9].expect_bool("allow dynamic fee")?;

    if reserve_a > output.value.quantity_of(&asset_a) || reserve_b > output.value.quantity_of(&asset_b) {
        return Err(DecodeError::InvalidDatum(format!(
            "datum reserves ({}, {}) exceed the output value",
            reserve_a, reserve_b
        )));
    }

    Ok(PoolSnapshot::V2(V2PoolSnapshot {
        lp_asset: AssetUnit::new(&cfg.lp_policy, &v2_lp_asset_name(&asset_a, &asset_b)),
        asset_a,
        asset_b,
        reserve_a,
        reserve_b,
        total_liquidity,
        base_fee_a_numerator,
        base_fee_b_numerator,
        fee_sharing_numerator,
        allow_dynamic_fee,
        provenance: output_ref.clone(),
        pool_address: output.address.clone(),
        raw_datum: datum.clone(),
    }))
}

fn decode_stable(
    candidates: &[&StablePoolConfig],
    output_ref: &TxOutputRef,
    output: &TxOutput,
    witnesses: &DatumWitnesses<'_>,
) -> Result<PoolSnapshot, DecodeError> {
    const FAMILY: &str = "stable";

    let matched: Vec<&StablePoolConfig> = candidates
        .iter()
        .copied()
        .filter(|cfg| output.value.quantity_of(&cfg.nft_asset) == 1)
        .collect();
    let cfg = match matched.as_slice() {
        [cfg] => *cfg,
        other => {
            return Err(DecodeError::MissingMarker {
                family: FAMILY,
                found: other.len(),
            })
        }
    };

    let relevant: Vec<&AssetUnit> = output
        .value
        .iter()
        .map(|(unit, _)| unit)
        .filter(|unit| **unit != cfg.nft_asset && **unit != cfg.lp_asset && !unit.is_native())
        .collect();
    let basket_tokens = cfg.assets.iter().filter(|unit| !unit.is_native()).count();
    if relevant.len() != basket_tokens || !relevant.iter().all(|unit| cfg.assets.contains(unit)) {
        return Err(DecodeError::MalformedPoolOutput {
            family: FAMILY,
            relevant: relevant.len(),
        });
    }

    let datum = witnesses.resolve(output.datum.as_ref())?;
    let fields = datum.expect_constr(0, 4, "stable pool datum")?;
    let balances = fields[0]
        .expect_list("balances")?
        .iter()
        .map(|b| b.expect_quantity("balance"))
        .collect::<Result<Vec<u64>, _>>()?;
    if balances.len() != cfg.assets.len() {
        return Err(DecodeError::InvalidDatum(format!(
            "{} balances for a basket of {} assets",
            balances.len(),
            cfg.assets.len()
        )));
    }
    if let Some(asset) = cfg
        .assets
        .iter()
        .zip(&balances)
        .find(|(asset, balance)| **balance > output.value.quantity_of(asset))
        .map(|(asset, _)| asset)
    {
        return Err(DecodeError::InvalidDatum(format!(
            "datum balance of {} exceeds the output value",
            asset
        )));
    }
    let total_liquidity = fields[1].expect_quantity("total liquidity")?;
    let amplification_coefficient = fields[2].expect_quantity("amplification coefficient")?;
    let order_hash = hex::encode(fields[3].expect_bytes("order hash")?);

    Ok(PoolSnapshot::Stable(StablePoolSnapshot {
        pool_nft: cfg.nft_asset.clone(),
        lp_asset: cfg.lp_asset.clone(),
        assets: cfg.assets.clone(),
        balances,
        total_liquidity,
        amplification_coefficient,
        order_hash,
        provenance: output_ref.clone(),
        pool_address: output.address.clone(),
        raw_datum: datum.clone(),
    }))
}

fn marker_count(markers: &[(&AssetUnit, u64)]) -> usize {
    markers
        .iter()
        .map(|(_, qty)| usize::try_from(*qty).unwrap_or(usize::MAX))
        .fold(0usize, usize::saturating_add)
}

/// The pool's traded pair once marker tokens are excluded. Two remaining
/// assets are the pair itself; with three, the native asset is only the
/// minimum deposit and the other two form the pair.
fn tradable_pair(
    family: &'static str,
    value: &Value,
    is_excluded: impl Fn(&AssetUnit) -> bool,
) -> Result<(AssetUnit, AssetUnit), DecodeError> {
    let relevant: Vec<&AssetUnit> = value.iter().map(|(unit, _)| unit).filter(|unit| !is_excluded(unit)).collect();

    let (a, b) = match relevant.as_slice() {
        [a, b] => ((*a).clone(), (*b).clone()),
        [_, _, _] => {
            let tokens: Vec<&&AssetUnit> = relevant.iter().filter(|unit| !unit.is_native()).collect();
            match tokens.as_slice() {
                [a, b] => ((**a).clone(), (**b).clone()),
                _ => return Err(DecodeError::MalformedPoolOutput { family, relevant: 3 }),
            }
        }
        other => {
            return Err(DecodeError::MalformedPoolOutput {
                family,
                relevant: other.len(),
            })
        }
    };

    Ok(normalize_asset_pair(a, b))
}

/// Asset datum: constructor 0 `[policy id bytes, asset name bytes]`
fn parse_asset(data: &PlutusData, what: &str) -> Result<AssetUnit, DecodeError> {
    let fields = data.expect_constr(0, 2, what)?;
    let policy_id = hex::encode(fields[0].expect_bytes(what)?);
    let asset_name = hex::encode(fields[1].expect_bytes(what)?);
    Ok(AssetUnit::new(&policy_id, &asset_name))
}

fn check_datum_pair(
    a: &PlutusData,
    b: &PlutusData,
    asset_a: &AssetUnit,
    asset_b: &AssetUnit,
) -> Result<(), DecodeError> {
    let (datum_a, datum_b) = normalize_asset_pair(parse_asset(a, "asset A")?, parse_asset(b, "asset B")?);
    if &datum_a != asset_a || &datum_b != asset_b {
        return Err(DecodeError::InvalidDatum(format!(
            "datum pair {}/{} does not match output pair {}/{}",
            datum_a, datum_b, asset_a, asset_b
        )));
    }
    Ok(())
}

/// Deterministic LP asset name for a v2 pair: sha3-256 over the sha3-256
/// hashes of both units' raw `policy ++ name` bytes
fn v2_lp_asset_name(asset_a: &AssetUnit, asset_b: &AssetUnit) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(Sha3_256::digest(unit_bytes(asset_a)));
    hasher.update(Sha3_256::digest(unit_bytes(asset_b)));
    hex::encode(hasher.finalize())
}

fn unit_bytes(unit: &AssetUnit) -> Vec<u8> {
    if unit.is_native() {
        return Vec::new();
    }
    hex::decode(unit.as_str()).unwrap_or_else(|_| unit.as_str().as_bytes().to_vec())
}
