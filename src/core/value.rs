//! Multi-asset values
//!
//! A [`Value`] is an amount of lovelace plus a bag of native assets keyed by
//! [`AssetId`]. All arithmetic is checked: the builder relies on these
//! operations never wrapping when it verifies the balance equation.

use crate::crypto::hash::{hex_to_array, HASH28_LEN};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Unit name used by indexers for the base currency
pub const LOVELACE_UNIT: &str = "lovelace";

/// Maximum asset name length accepted by the ledger
pub const MAX_ASSET_NAME_LEN: usize = 32;

// =============================================================================
// Asset Identifier
// =============================================================================

/// Native asset identifier: minting policy hash plus asset name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId {
    pub policy_id: [u8; HASH28_LEN],
    pub asset_name: Vec<u8>,
}

impl AssetId {
    pub fn new(policy_id: [u8; HASH28_LEN], asset_name: Vec<u8>) -> Self {
        Self {
            policy_id,
            asset_name,
        }
    }

    /// Parse an indexer "unit" string (`<policy hex><name hex>`)
    ///
    /// Returns `None` for `lovelace` and for anything malformed.
    pub fn from_unit(unit: &str) -> Option<Self> {
        if unit == LOVELACE_UNIT || unit.len() < HASH28_LEN * 2 {
            return None;
        }
        let (policy_hex, name_hex) = unit.split_at(HASH28_LEN * 2);
        let policy_id = hex_to_array::<HASH28_LEN>(policy_hex)?;
        let asset_name = hex::decode(name_hex).ok()?;
        if asset_name.len() > MAX_ASSET_NAME_LEN {
            return None;
        }
        Some(Self::new(policy_id, asset_name))
    }

    /// The concatenated unit string understood by indexers
    pub fn unit(&self) -> String {
        format!(
            "{}{}",
            hex::encode(self.policy_id),
            hex::encode(&self.asset_name)
        )
    }

    pub fn policy_hex(&self) -> String {
        hex::encode(self.policy_id)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            hex::encode(self.policy_id),
            hex::encode(&self.asset_name)
        )
    }
}

impl FromStr for AssetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (policy_hex, name_hex) = s
            .split_once('.')
            .ok_or_else(|| format!("asset id '{}' is missing the '.' separator", s))?;
        let policy_id = hex_to_array::<HASH28_LEN>(policy_hex)
            .ok_or_else(|| format!("invalid policy id '{}'", policy_hex))?;
        let asset_name =
            hex::decode(name_hex).map_err(|e| format!("invalid asset name hex: {}", e))?;
        if asset_name.len() > MAX_ASSET_NAME_LEN {
            return Err(format!("asset name longer than {} bytes", MAX_ASSET_NAME_LEN));
        }
        Ok(Self::new(policy_id, asset_name))
    }
}

impl Serialize for AssetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Value
// =============================================================================

/// Lovelace plus native assets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub coin: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub assets: BTreeMap<AssetId, u64>,
}

impl Value {
    /// An ADA-only value
    pub fn lovelace(coin: u64) -> Self {
        Self {
            coin,
            assets: BTreeMap::new(),
        }
    }

    /// Add `quantity` of an asset, dropping zero entries
    pub fn with_asset(mut self, asset: AssetId, quantity: u64) -> Self {
        if quantity > 0 {
            *self.assets.entry(asset).or_insert(0) += quantity;
        }
        self
    }

    /// True when no native assets are carried
    pub fn is_ada_only(&self) -> bool {
        self.assets.values().all(|q| *q == 0)
    }

    pub fn quantity_of(&self, asset: &AssetId) -> u64 {
        self.assets.get(asset).copied().unwrap_or(0)
    }

    /// Component-wise addition, `None` on overflow
    pub fn checked_add(&self, other: &Value) -> Option<Value> {
        let mut out = self.clone();
        out.coin = out.coin.checked_add(other.coin)?;
        for (asset, qty) in &other.assets {
            let entry = out.assets.entry(asset.clone()).or_insert(0);
            *entry = entry.checked_add(*qty)?;
        }
        out.normalize();
        Some(out)
    }

    /// Component-wise subtraction, `None` if any asset class would go negative
    pub fn checked_sub(&self, other: &Value) -> Option<Value> {
        let mut out = self.clone();
        out.coin = out.coin.checked_sub(other.coin)?;
        for (asset, qty) in &other.assets {
            let have = out.assets.get(asset).copied().unwrap_or(0);
            out.assets.insert(asset.clone(), have.checked_sub(*qty)?);
        }
        out.normalize();
        Some(out)
    }

    /// Sum a sequence of values, `None` on overflow
    pub fn sum<'a, I>(values: I) -> Option<Value>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        values
            .into_iter()
            .try_fold(Value::default(), |acc, v| acc.checked_add(v))
    }

    /// The asset part only
    pub fn assets_only(&self) -> Value {
        Value {
            coin: 0,
            assets: self.assets.clone(),
        }
    }

    /// Asset entries grouped by policy, in canonical order
    pub fn assets_by_policy(&self) -> BTreeMap<[u8; HASH28_LEN], Vec<(&[u8], u64)>> {
        let mut grouped: BTreeMap<[u8; HASH28_LEN], Vec<(&[u8], u64)>> = BTreeMap::new();
        for (asset, qty) in &self.assets {
            if *qty == 0 {
                continue;
            }
            grouped
                .entry(asset.policy_id)
                .or_default()
                .push((asset.asset_name.as_slice(), *qty));
        }
        grouped
    }

    fn normalize(&mut self) {
        self.assets.retain(|_, q| *q > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(name: &str) -> AssetId {
        AssetId::new([7u8; HASH28_LEN], name.as_bytes().to_vec())
    }

    #[test]
    fn test_checked_sub_rejects_negative_asset() {
        let have = Value::lovelace(10).with_asset(token("a"), 1);
        let need = Value::lovelace(5).with_asset(token("a"), 2);
        assert!(have.checked_sub(&need).is_none());

        let rest = have.checked_sub(&Value::lovelace(4)).unwrap();
        assert_eq!(rest.coin, 6);
        assert_eq!(rest.quantity_of(&token("a")), 1);
    }

    #[test]
    fn test_zero_entries_are_dropped() {
        let v = Value::lovelace(3).with_asset(token("a"), 2);
        let rest = v
            .checked_sub(&Value::lovelace(0).with_asset(token("a"), 2))
            .unwrap();
        assert!(rest.is_ada_only());
        assert!(rest.assets.is_empty());
    }

    #[test]
    fn test_unit_parsing() {
        let asset = token("Session");
        let parsed = AssetId::from_unit(&asset.unit()).unwrap();
        assert_eq!(parsed, asset);
        assert!(AssetId::from_unit(LOVELACE_UNIT).is_none());
        assert!(AssetId::from_unit("abcd").is_none());
    }

    #[test]
    fn test_value_json_uses_string_keys() {
        let v = Value::lovelace(1).with_asset(token("x"), 5);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
