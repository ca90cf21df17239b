//! Transaction drafts for the Cardano ledger
//!
//! A [`TransactionDraft`] is an unsigned Babbage-era transaction:
//! - resolved inputs kept in canonical `(tx_hash, index)` order, so redeemer
//!   indices stay stable
//! - outputs in post-Alonzo map form with inline datums
//! - fee, mint, collateral, required signers
//! - Plutus V2 scripts and redeemers in the witness set
//! - optional auxiliary data
//!
//! Serialization follows the ledger CDDL:
//! `[body, witness_set, is_valid, auxiliary_data / null]`. The transaction id
//! is the blake2b-256 digest of the serialized body.

use super::address::{Address, AddressError};
use super::fee::{ExUnits, VKEY_WITNESS_SIZE};
use super::script::PlutusScript;
use super::value::{AssetId, Value};
use crate::codec::cbor::{Encoder, TAG_ENCODED_CBOR};
use crate::codec::metadata::AuxiliaryData;
use crate::codec::plutus_data::PlutusData;
use crate::crypto::hash::{blake2b_256, hex_to_array, HASH28_LEN, HASH32_LEN};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Invalid output reference: {0}")]
    InvalidOutRef(String),
    #[error("Invalid output address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("Value overflow while summing {0}")]
    ValueOverflow(&'static str),
    #[error("Unbalanced transaction: consumed {consumed:?}, produced {produced:?}")]
    Unbalanced { consumed: Value, produced: Value },
}

// =============================================================================
// Output Reference
// =============================================================================

/// Pointer to a transaction output: `<tx hash hex>#<index>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutRef {
    pub tx_hash: [u8; HASH32_LEN],
    pub index: u32,
}

impl OutRef {
    pub fn new(tx_hash: [u8; HASH32_LEN], index: u32) -> Self {
        Self { tx_hash, index }
    }

    pub fn tx_hash_hex(&self) -> String {
        hex::encode(self.tx_hash)
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.array(2).bytes(&self.tx_hash).uint(u64::from(self.index));
    }
}

impl fmt::Display for OutRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", hex::encode(self.tx_hash), self.index)
    }
}

impl FromStr for OutRef {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, index) = s
            .split_once('#')
            .ok_or_else(|| TransactionError::InvalidOutRef(s.to_string()))?;
        let tx_hash = hex_to_array::<HASH32_LEN>(hash)
            .ok_or_else(|| TransactionError::InvalidOutRef(s.to_string()))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| TransactionError::InvalidOutRef(s.to_string()))?;
        Ok(Self { tx_hash, index })
    }
}

impl Serialize for OutRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OutRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// UTXO
// =============================================================================

/// Unspent output as reported by a chain indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub out_ref: OutRef,
    /// Owner address (bech32)
    pub address: String,
    pub value: Value,
    /// Inline datum, CBOR hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_datum: Option<String>,
}

impl Utxo {
    pub fn new(out_ref: OutRef, address: impl Into<String>, value: Value) -> Self {
        Self {
            out_ref,
            address: address.into(),
            value,
            inline_datum: None,
        }
    }

    pub fn with_inline_datum(mut self, datum_hex: impl Into<String>) -> Self {
        self.inline_datum = Some(datum_hex.into());
        self
    }
}

// =============================================================================
// Transaction Output
// =============================================================================

/// Output being created by a draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub address: Address,
    pub value: Value,
    pub inline_datum: Option<PlutusData>,
}

impl TxOutput {
    pub fn new(address: &str, value: Value) -> Result<Self, TransactionError> {
        Ok(Self {
            address: Address::from_bech32(address)?,
            value,
            inline_datum: None,
        })
    }

    pub fn with_inline_datum(mut self, datum: PlutusData) -> Self {
        self.inline_datum = Some(datum);
        self
    }

    pub fn address_bech32(&self) -> Result<String, AddressError> {
        self.address.to_bech32()
    }

    pub fn encode(&self, enc: &mut Encoder) {
        let fields = if self.inline_datum.is_some() { 3 } else { 2 };
        enc.map(fields);
        enc.uint(0).bytes(self.address.as_bytes());
        enc.uint(1);
        encode_value(enc, &self.value);
        if let Some(datum) = &self.inline_datum {
            enc.uint(2)
                .array(2)
                .uint(1)
                .tag(TAG_ENCODED_CBOR)
                .bytes(&datum.to_cbor());
        }
    }

    /// Serialized size, used for the per-byte minimum value
    pub fn encoded_size(&self) -> u64 {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.len() as u64
    }
}

fn encode_value(enc: &mut Encoder, value: &Value) {
    let grouped = value.assets_by_policy();
    if grouped.is_empty() {
        enc.uint(value.coin);
        return;
    }
    enc.array(2).uint(value.coin);
    enc.map(grouped.len() as u64);
    for (policy, assets) in grouped {
        enc.bytes(&policy).map(assets.len() as u64);
        for (name, qty) in assets {
            enc.bytes(name).uint(qty);
        }
    }
}

fn encode_mint(enc: &mut Encoder, mint: &BTreeMap<AssetId, i64>) {
    let mut grouped: BTreeMap<[u8; HASH28_LEN], Vec<(&[u8], i64)>> = BTreeMap::new();
    for (asset, qty) in mint {
        if *qty != 0 {
            grouped
                .entry(asset.policy_id)
                .or_default()
                .push((asset.asset_name.as_slice(), *qty));
        }
    }
    enc.map(grouped.len() as u64);
    for (policy, assets) in grouped {
        enc.bytes(&policy).map(assets.len() as u64);
        for (name, qty) in assets {
            enc.bytes(name).int(i128::from(qty));
        }
    }
}

// =============================================================================
// Redeemers
// =============================================================================

/// What a redeemer points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedeemerTag {
    Spend,
    Mint,
}

impl RedeemerTag {
    fn code(&self) -> u64 {
        match self {
            RedeemerTag::Spend => 0,
            RedeemerTag::Mint => 1,
        }
    }
}

/// Redeemer attached to a script input or minting policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redeemer {
    pub tag: RedeemerTag,
    /// Input position (spend) or policy position (mint) in canonical order
    pub index: u32,
    pub data: PlutusData,
    pub ex_units: ExUnits,
}

impl Redeemer {
    fn encode(&self, enc: &mut Encoder) {
        enc.array(4).uint(self.tag.code()).uint(u64::from(self.index));
        self.data.encode(enc);
        enc.array(2).uint(self.ex_units.mem).uint(self.ex_units.steps);
    }
}

// =============================================================================
// Transaction Draft
// =============================================================================

/// An unsigned transaction under construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionDraft {
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    pub mint: BTreeMap<AssetId, i64>,
    pub collateral: Vec<Utxo>,
    pub required_signers: Vec<[u8; HASH28_LEN]>,
    pub redeemers: Vec<Redeemer>,
    pub scripts: Vec<PlutusScript>,
    pub auxiliary_data: Option<AuxiliaryData>,
    pub script_data_hash: Option<[u8; HASH32_LEN]>,
}

impl TransactionDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort inputs into the ledger's canonical order
    pub fn sort_inputs(&mut self) {
        self.inputs.sort_by(|a, b| a.out_ref.cmp(&b.out_ref));
        self.inputs.dedup_by(|a, b| a.out_ref == b.out_ref);
        self.collateral.sort_by(|a, b| a.out_ref.cmp(&b.out_ref));
    }

    /// Position of an input in canonical order
    pub fn input_index(&self, out_ref: &OutRef) -> Option<u32> {
        let mut refs: Vec<&OutRef> = self.inputs.iter().map(|u| &u.out_ref).collect();
        refs.sort();
        refs.iter()
            .position(|r| *r == out_ref)
            .and_then(|i| u32::try_from(i).ok())
    }

    pub fn total_input(&self) -> Result<Value, TransactionError> {
        Value::sum(self.inputs.iter().map(|u| &u.value))
            .ok_or(TransactionError::ValueOverflow("inputs"))
    }

    pub fn total_output(&self) -> Result<Value, TransactionError> {
        Value::sum(self.outputs.iter().map(|o| &o.value))
            .ok_or(TransactionError::ValueOverflow("outputs"))
    }

    pub fn total_ex_units(&self) -> ExUnits {
        self.redeemers
            .iter()
            .fold(ExUnits::default(), |acc, r| acc.saturating_add(r.ex_units))
    }

    /// Minted (positive) and burned (negative) quantities as two values
    pub fn mint_split(&self) -> (Value, Value) {
        let mut minted = Value::default();
        let mut burned = Value::default();
        for (asset, qty) in &self.mint {
            if *qty > 0 {
                minted = minted.with_asset(asset.clone(), qty.unsigned_abs());
            } else if *qty < 0 {
                burned = burned.with_asset(asset.clone(), qty.unsigned_abs());
            }
        }
        (minted, burned)
    }

    /// Check inputs + minted == outputs + fee + burned, for every asset class
    pub fn verify_balance(&self) -> Result<(), TransactionError> {
        let (minted, burned) = self.mint_split();
        let consumed = self
            .total_input()?
            .checked_add(&minted)
            .ok_or(TransactionError::ValueOverflow("consumed"))?;
        let produced = self
            .total_output()?
            .checked_add(&Value::lovelace(self.fee))
            .and_then(|v| v.checked_add(&burned))
            .ok_or(TransactionError::ValueOverflow("produced"))?;
        if consumed != produced {
            return Err(TransactionError::Unbalanced { consumed, produced });
        }
        Ok(())
    }

    /// blake2b-256(redeemers || language views). Datums are always inline,
    /// so the witness datum segment is empty and omitted.
    pub fn compute_script_data_hash(&self, cost_model_v2: &[i64]) -> Option<[u8; HASH32_LEN]> {
        if self.redeemers.is_empty() {
            return None;
        }
        let mut enc = Encoder::new();
        self.encode_redeemers(&mut enc);
        enc.map(1).uint(1).array(cost_model_v2.len() as u64);
        for cost in cost_model_v2 {
            enc.int(i128::from(*cost));
        }
        Some(blake2b_256(&enc.into_bytes()))
    }

    fn encode_redeemers(&self, enc: &mut Encoder) {
        enc.array(self.redeemers.len() as u64);
        for redeemer in &self.redeemers {
            redeemer.encode(enc);
        }
    }

    pub fn body_cbor(&self) -> Vec<u8> {
        let mut inputs: Vec<&OutRef> = self.inputs.iter().map(|u| &u.out_ref).collect();
        inputs.sort();
        let mut collateral: Vec<&OutRef> = self.collateral.iter().map(|u| &u.out_ref).collect();
        collateral.sort();
        let has_mint = self.mint.values().any(|q| *q != 0);

        let fields = 3
            + u64::from(self.auxiliary_data.is_some())
            + u64::from(has_mint)
            + u64::from(self.script_data_hash.is_some())
            + u64::from(!collateral.is_empty())
            + u64::from(!self.required_signers.is_empty());

        let mut enc = Encoder::new();
        enc.map(fields);

        enc.uint(0).array(inputs.len() as u64);
        for input in inputs {
            input.encode(&mut enc);
        }

        enc.uint(1).array(self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode(&mut enc);
        }

        enc.uint(2).uint(self.fee);

        if let Some(aux) = &self.auxiliary_data {
            enc.uint(7).bytes(&aux.hash());
        }
        if has_mint {
            enc.uint(9);
            encode_mint(&mut enc, &self.mint);
        }
        if let Some(hash) = &self.script_data_hash {
            enc.uint(11).bytes(hash);
        }
        if !collateral.is_empty() {
            enc.uint(13).array(collateral.len() as u64);
            for input in collateral {
                input.encode(&mut enc);
            }
        }
        if !self.required_signers.is_empty() {
            enc.uint(14).array(self.required_signers.len() as u64);
            for signer in &self.required_signers {
                enc.bytes(signer);
            }
        }

        enc.into_bytes()
    }

    fn encode_witness_set(&self, enc: &mut Encoder) {
        let fields = u64::from(!self.redeemers.is_empty()) + u64::from(!self.scripts.is_empty());
        enc.map(fields);
        if !self.redeemers.is_empty() {
            enc.uint(5);
            self.encode_redeemers(enc);
        }
        if !self.scripts.is_empty() {
            enc.uint(6).array(self.scripts.len() as u64);
            for script in &self.scripts {
                enc.bytes(script.as_bytes());
            }
        }
    }

    /// Full unsigned transaction
    pub fn to_cbor(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.array(4).raw(&self.body_cbor());
        self.encode_witness_set(&mut enc);
        enc.bool(true);
        match &self.auxiliary_data {
            Some(aux) => {
                aux.encode(&mut enc);
            }
            None => {
                enc.null();
            }
        }
        enc.into_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_cbor())
    }

    pub fn tx_id(&self) -> [u8; HASH32_LEN] {
        blake2b_256(&self.body_cbor())
    }

    pub fn tx_id_hex(&self) -> String {
        hex::encode(self.tx_id())
    }

    /// Size once `signers` vkey witnesses have been added by the wallet
    pub fn estimated_size(&self, signers: usize) -> u64 {
        self.to_cbor().len() as u64 + VKEY_WITNESS_SIZE * signers as u64
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::Network;

    fn addr(seed: u8) -> String {
        Address::base_key([seed; 28], [seed; 28], Network::Preprod)
            .to_bech32()
            .unwrap()
    }

    fn utxo(seed: u8, index: u32, coin: u64) -> Utxo {
        Utxo::new(OutRef::new([seed; 32], index), addr(1), Value::lovelace(coin))
    }

    #[test]
    fn test_out_ref_parsing() {
        let out_ref = OutRef::new([0xaa; 32], 3);
        let text = out_ref.to_string();
        assert_eq!(text, format!("{}#3", "aa".repeat(32)));
        assert_eq!(text.parse::<OutRef>().unwrap(), out_ref);
        assert!("abcd#1".parse::<OutRef>().is_err());
        assert!(format!("{}#x", "aa".repeat(32)).parse::<OutRef>().is_err());
        assert!("no-separator".parse::<OutRef>().is_err());
    }

    #[test]
    fn test_utxo_json() {
        let u = utxo(2, 1, 5).with_inline_datum("d87980");
        let json = serde_json::to_string(&u).unwrap();
        assert!(json.contains(&format!("{}#1", "02".repeat(32))));
        let back: Utxo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, u);
    }

    #[test]
    fn test_balance_check() {
        let mut draft = TransactionDraft::new();
        draft.inputs.push(utxo(1, 0, 10_000_000));
        draft
            .outputs
            .push(TxOutput::new(&addr(2), Value::lovelace(9_800_000)).unwrap());
        draft.fee = 200_000;
        assert!(draft.verify_balance().is_ok());

        draft.fee = 199_999;
        assert!(matches!(
            draft.verify_balance(),
            Err(TransactionError::Unbalanced { .. })
        ));
    }

    #[test]
    fn test_balance_counts_mint() {
        let asset = AssetId::new([9; 28], b"token".to_vec());
        let mut draft = TransactionDraft::new();
        draft.inputs.push(utxo(1, 0, 3_000_000));
        draft.mint.insert(asset.clone(), 1);
        draft.outputs.push(
            TxOutput::new(&addr(2), Value::lovelace(2_800_000).with_asset(asset, 1)).unwrap(),
        );
        draft.fee = 200_000;
        assert!(draft.verify_balance().is_ok());
    }

    #[test]
    fn test_input_index_is_canonical() {
        let mut draft = TransactionDraft::new();
        draft.inputs.push(utxo(9, 0, 1));
        draft.inputs.push(utxo(1, 5, 1));
        draft.inputs.push(utxo(1, 2, 1));
        assert_eq!(draft.input_index(&OutRef::new([1; 32], 2)), Some(0));
        assert_eq!(draft.input_index(&OutRef::new([1; 32], 5)), Some(1));
        assert_eq!(draft.input_index(&OutRef::new([9; 32], 0)), Some(2));
        assert_eq!(draft.input_index(&OutRef::new([7; 32], 0)), None);
    }

    #[test]
    fn test_simple_body_encoding() {
        let mut draft = TransactionDraft::new();
        draft.inputs.push(utxo(1, 0, 2_000_000));
        draft
            .outputs
            .push(TxOutput::new(&addr(2), Value::lovelace(1_800_000)).unwrap());
        draft.fee = 200_000;

        let body = draft.body_cbor();
        // map(3), key 0, array(1), array(2), bytes(32)
        assert_eq!(&body[..5], &[0xa3, 0x00, 0x81, 0x82, 0x58]);
        assert_eq!(draft.tx_id(), blake2b_256(&body));

        let tx = draft.to_cbor();
        // array(4) ... empty witness map, true, null
        assert_eq!(tx[0], 0x84);
        assert_eq!(&tx[tx.len() - 3..], &[0xa0, 0xf5, 0xf6]);
        assert_eq!(
            draft.estimated_size(1),
            tx.len() as u64 + VKEY_WITNESS_SIZE
        );
    }

    #[test]
    fn test_inline_datum_output() {
        let output = TxOutput::new(&addr(2), Value::lovelace(2_000_000))
            .unwrap()
            .with_inline_datum(PlutusData::unit_constr(0));
        let mut enc = Encoder::new();
        output.encode(&mut enc);
        let bytes = enc.into_bytes();
        assert_eq!(bytes[0], 0xa3);
        // [1, 24(h'd87980')]
        assert!(hex::encode(&bytes).ends_with("028201d81843d87980"));
    }

    #[test]
    fn test_script_data_hash_requires_redeemers() {
        let mut draft = TransactionDraft::new();
        assert!(draft.compute_script_data_hash(&[1, 2, 3]).is_none());
        draft.redeemers.push(Redeemer {
            tag: RedeemerTag::Spend,
            index: 0,
            data: PlutusData::unit_constr(0),
            ex_units: ExUnits::new(10, 20),
        });
        let a = draft.compute_script_data_hash(&[1, 2, 3]).unwrap();
        let b = draft.compute_script_data_hash(&[1, 2, 4]).unwrap();
        assert_ne!(a, b);
    }
}
