//! Output decoder tests

use anyhow::Result;
use pool_syncer::core::{
    AssetUnit, Block, Datum, DecodeError, PlutusData, Transaction, TxOutput, TxOutputRef, Value,
};
use pool_syncer::domain::{
    normalize_asset_pair, DatumWitnesses, NetworkContext, NetworkEnvironment, PoolDecoder, PoolSnapshot,
};
use std::collections::HashMap;

const LEGACY_SCRIPT: &str = "e1317b152faac13426e6a83e06ff88a4d62cce3c1634ab0a5ec13309";
const LEGACY_NFT_POLICY: &str = "0be55d262b29f564998ff81efe21bdc0022621c12f15af08d0f2ddb1";
const LEGACY_LP_POLICY: &str = "e4214b7cce62ac6fbba385d164df48e157eae5863521b4b67ca71d86";
const V2_SCRIPT: &str = "ea07b733d932129c378af627436e7cbc2ef0bf96e0036bb51b3bde6b";
const V2_LP_POLICY: &str = "f5808c2c990d86da54bfc97d89cee6efa20cd8461616359478d96b4c";
const MIN_POLICY: &str = "29d222ce763455e3d7a09a665ce554f00ac89d2e99a1a83d267170c6";

fn mainnet_decoder() -> PoolDecoder {
    PoolDecoder::new(NetworkContext::builtin(NetworkEnvironment::Mainnet).unwrap())
}

fn asset_datum(unit: &AssetUnit) -> PlutusData {
    PlutusData::constr(
        0,
        vec![
            PlutusData::Bytes(hex::decode(unit.policy_id()).unwrap()),
            PlutusData::Bytes(hex::decode(unit.asset_name()).unwrap()),
        ],
    )
}

fn legacy_output(nft_name: &str, lovelace: u64, tokens: u64, datum_hash: &str) -> TxOutput {
    TxOutput {
        address: format!("31{}{}", LEGACY_SCRIPT, "44".repeat(28)),
        value: Value::new()
            .with(AssetUnit::native(), lovelace)
            .with(AssetUnit::new(LEGACY_NFT_POLICY, nft_name), 1)
            .with(AssetUnit::new(MIN_POLICY, "4d494e"), tokens),
        datum: Some(Datum::Hash(datum_hash.to_string())),
    }
}

fn legacy_datum() -> PlutusData {
    PlutusData::constr(
        0,
        vec![
            asset_datum(&AssetUnit::native()),
            asset_datum(&AssetUnit::new(MIN_POLICY, "4d494e")),
            PlutusData::int(8_000_000_000u64),
            PlutusData::int(7_500_000_000u64),
            PlutusData::constr(
                0,
                vec![PlutusData::constr(0, vec![PlutusData::Bytes(vec![0x11; 28])])],
            ),
        ],
    )
}

#[test]
fn test_pair_normalization() {
    let token = AssetUnit::parse("abc123xyz");
    let (a, b) = normalize_asset_pair(token.clone(), AssetUnit::native());
    assert_eq!(a.as_str(), "lovelace");
    assert_eq!(b, token);

    let aa = AssetUnit::parse("aa11");
    let bb = AssetUnit::parse("bb22");
    assert_eq!(normalize_asset_pair(bb.clone(), aa.clone()), (aa, bb));
}

/// Batching stake credential as carried by mainnet v2 pool datums
fn batcher_credential() -> PlutusData {
    PlutusData::constr(
        0,
        vec![PlutusData::constr(
            1,
            vec![PlutusData::Bytes(
                hex::decode("ab5c3b3fb3a3b2d3c2c1a1a5b0a4c2f4e5a7b6c8d9e0f1a2b3c4d5e6").unwrap(),
            )],
        )],
    )
}

fn v2_datum(reserve_a: u64, reserve_b: u64, fee_sharing: Option<u64>, dynamic_fee: bool) -> PlutusData {
    let token = AssetUnit::new(MIN_POLICY, "4d494e");
    PlutusData::constr(
        0,
        vec![
            batcher_credential(),
            asset_datum(&AssetUnit::native()),
            asset_datum(&token),
            PlutusData::int(50_000_000u64),
            PlutusData::int(reserve_a),
            PlutusData::int(reserve_b),
            PlutusData::int(30),
            PlutusData::int(30),
            match fee_sharing {
                Some(n) => PlutusData::constr(0, vec![PlutusData::int(n)]),
                None => PlutusData::constr(1, vec![]),
            },
            PlutusData::constr(u64::from(dynamic_fee), vec![]),
        ],
    )
}

#[test]
fn test_v2_scenario_reserve_from_lovelace() -> Result<()> {
    let token = AssetUnit::new(MIN_POLICY, "4d494e");
    let output = TxOutput {
        address: format!("71{}", V2_SCRIPT),
        value: [
            (AssetUnit::native(), 111_990_389),
            (AssetUnit::new(V2_LP_POLICY, "4d5350"), 1),
            (token.clone(), 42_000),
        ]
        .into_iter()
        .collect(),
        datum: Some(Datum::Inline(v2_datum(111_990_389, 42_000, Some(1666), false))),
    };

    let snapshot = mainnet_decoder()
        .decode(&TxOutputRef::new("ff00", 0), &output, &DatumWitnesses::default())?
        .expect("v2 pool output");

    match snapshot {
        PoolSnapshot::V2(pool) => {
            assert_eq!(pool.reserve_a, 111_990_389);
            assert_eq!(pool.reserve_b, 42_000);
            assert_eq!(pool.asset_b, token);
            assert_eq!(pool.fee_sharing_numerator, Some(1666));
            assert!(!pool.allow_dynamic_fee);
            assert_eq!(pool.lp_asset.policy_id(), V2_LP_POLICY);
        }
        other => panic!("expected a v2 snapshot, got {:?}", other),
    }

    Ok(())
}

#[test]
fn test_v2_lp_asset_matches_mainnet_ada_min_pool() -> Result<()> {
    let output = TxOutput {
        address: format!("31{}{}", V2_SCRIPT, "52".repeat(28)),
        value: Value::new()
            .with(AssetUnit::native(), 2_500_000_000)
            .with(AssetUnit::new(V2_LP_POLICY, "4d5350"), 1)
            .with(AssetUnit::new(MIN_POLICY, "4d494e"), 60_000_000_000),
        datum: Some(Datum::Inline(v2_datum(2_497_000_000, 60_000_000_000, None, true))),
    };

    let snapshot = mainnet_decoder()
        .decode(&TxOutputRef::new("ff01", 0), &output, &DatumWitnesses::default())?
        .expect("v2 pool output");

    assert_eq!(
        snapshot.lp_asset(),
        &AssetUnit::new(
            V2_LP_POLICY,
            "82e2b1fd27a7712a1a9cf750dfbea1a5778611b20e06dd6a611df7a643f8cb75"
        )
    );
    match snapshot {
        PoolSnapshot::V2(pool) => {
            assert_eq!(pool.fee_sharing_numerator, None);
            assert!(pool.allow_dynamic_fee);
        }
        other => panic!("expected a v2 snapshot, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_v2_datum_without_batcher_credential_is_invalid() {
    let mut fields = match v2_datum(1_000, 10, None, false) {
        PlutusData::Constr { fields, .. } => fields,
        _ => unreachable!(),
    };
    fields.remove(0);
    let output = TxOutput {
        address: format!("71{}", V2_SCRIPT),
        value: Value::new()
            .with(AssetUnit::native(), 1_000)
            .with(AssetUnit::new(V2_LP_POLICY, "4d5350"), 1)
            .with(AssetUnit::new(MIN_POLICY, "4d494e"), 10),
        datum: Some(Datum::Inline(PlutusData::constr(0, fields))),
    };

    let err = mainnet_decoder()
        .decode(&TxOutputRef::new("ff02", 0), &output, &DatumWitnesses::default())
        .unwrap_err();
    assert!(matches!(err, DecodeError::InvalidDatum(_)));
}

#[test]
fn test_legacy_datum_resolved_from_block_witnesses() -> Result<()> {
    let mut datums = HashMap::new();
    datums.insert("d4".to_string(), legacy_datum());
    let block = Block {
        height: 10,
        slot: 100,
        header_hash: "aa".to_string(),
        transactions: vec![
            Transaction {
                id: "t1".to_string(),
                outputs: vec![legacy_output("c0ffee", 9_000_000_000, 7_000_000_000, "d4")],
                datums: HashMap::new(),
            },
            Transaction {
                id: "t2".to_string(),
                outputs: Vec::new(),
                datums,
            },
        ],
    };

    let witnesses = DatumWitnesses::from_block(&block);
    let output = &block.transactions[0].outputs[0];
    let snapshot = mainnet_decoder()
        .decode(&TxOutputRef::new("t1", 0), output, &witnesses)?
        .expect("legacy pool output");

    assert_eq!(snapshot.family().as_str(), "legacy");
    assert_eq!(snapshot.reserves(), vec![9_000_000_000, 7_000_000_000]);
    assert_eq!(snapshot.total_liquidity(), 8_000_000_000);
    assert_eq!(snapshot.lp_asset(), &AssetUnit::new(LEGACY_LP_POLICY, "c0ffee"));
    assert_eq!(snapshot.raw_datum(), &legacy_datum());
    match snapshot {
        PoolSnapshot::Legacy(pool) => assert!(pool.profit_sharing.is_some()),
        other => panic!("expected a legacy snapshot, got {:?}", other),
    }

    Ok(())
}

#[test]
fn test_legacy_missing_witness() {
    let output = legacy_output("c0ffee", 9_000_000, 7_000, "missing");
    let err = mainnet_decoder()
        .decode(&TxOutputRef::new("t1", 0), &output, &DatumWitnesses::default())
        .unwrap_err();
    assert_eq!(err, DecodeError::MissingDatumWitness("missing".to_string()));
}

#[test]
fn test_legacy_pair_mismatch_is_invalid_datum() {
    let mut datums = HashMap::new();
    let mut fields = match legacy_datum() {
        PlutusData::Constr { fields, .. } => fields,
        _ => unreachable!(),
    };
    fields[1] = asset_datum(&AssetUnit::new(MIN_POLICY, "4f54484552"));
    datums.insert("d4".to_string(), PlutusData::constr(0, fields));
    let tx = Transaction {
        id: "t1".to_string(),
        outputs: vec![legacy_output("c0ffee", 9_000_000, 7_000, "d4")],
        datums,
    };

    let err = mainnet_decoder()
        .decode(&TxOutputRef::new("t1", 0), &tx.outputs[0], &DatumWitnesses::from_transaction(&tx))
        .unwrap_err();
    assert!(matches!(err, DecodeError::InvalidDatum(_)));
}

#[test]
fn test_unrelated_outputs_are_ignored() -> Result<()> {
    let decoder = mainnet_decoder();
    let witnesses = DatumWitnesses::default();
    let value = Value::new().with(AssetUnit::native(), 1_500_000);

    for address in [
        format!("01{}{}", "12".repeat(28), "34".repeat(28)),
        format!("71{}", "56".repeat(28)),
        format!("e1{}", "78".repeat(28)),
    ] {
        let output = TxOutput {
            address,
            value: value.clone(),
            datum: None,
        };
        assert_eq!(decoder.decode(&TxOutputRef::new("00", 0), &output, &witnesses)?, None);
    }

    Ok(())
}
