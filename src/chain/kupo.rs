//! Kupo backend for local devnets
//!
//! Kupo reports inline datums by hash only; the datum bytes are fetched
//! from `/datums/{hash}` for each output that carries one.

use super::provider::{ProviderError, UtxoProvider};
use crate::core::transaction::{OutRef, Utxo};
use crate::core::value::{AssetId, Value};
use crate::crypto::hash::{hex_to_array, HASH28_LEN};
use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct KupoValue {
    coins: u64,
    #[serde(default)]
    assets: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
struct KupoMatch {
    transaction_id: String,
    output_index: u32,
    address: String,
    value: KupoValue,
    #[serde(default)]
    datum_hash: Option<String>,
    #[serde(default)]
    datum_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KupoDatum {
    datum: String,
}

impl KupoMatch {
    fn has_inline_datum(&self) -> bool {
        self.datum_hash.is_some() && self.datum_type.as_deref() == Some("inline")
    }

    fn value(&self) -> Result<Value, ProviderError> {
        let mut value = Value::lovelace(self.value.coins);
        for (key, quantity) in &self.value.assets {
            value = value.with_asset(parse_asset_key(key)?, *quantity);
        }
        Ok(value)
    }

    fn out_ref(&self) -> Result<OutRef, ProviderError> {
        let tx_hash = hex_to_array::<32>(&self.transaction_id).ok_or_else(|| {
            ProviderError::Decode(format!("bad transaction id '{}'", self.transaction_id))
        })?;
        Ok(OutRef::new(tx_hash, self.output_index))
    }
}

/// Kupo keys assets as `policy.name`, or bare `policy` for an empty name
fn parse_asset_key(key: &str) -> Result<AssetId, ProviderError> {
    if key.contains('.') {
        return key.parse().map_err(ProviderError::Decode);
    }
    let policy = hex_to_array::<HASH28_LEN>(key)
        .ok_or_else(|| ProviderError::Decode(format!("bad policy id '{}'", key)))?;
    Ok(AssetId::new(policy, Vec::new()))
}

/// Kupo HTTP client
#[derive(Clone)]
pub struct KupoClient {
    base_url: String,
    client: Client,
}

impl KupoClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<Response, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Kupo GET {}", url);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;
        Ok(response)
    }

    async fn fail(response: Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        error!("Kupo returned {}: {}", status, body);
        ProviderError::from_status(status, body)
    }

    async fn datum(&self, hash: &str) -> Result<Option<String>, ProviderError> {
        let response = self.get(&format!("/datums/{}", hash)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        let datum: Option<KupoDatum> = response.json().await?;
        Ok(datum.map(|d| d.datum))
    }

    /// Whether the indexer has caught up with the node
    pub async fn is_synced(&self) -> bool {
        #[derive(Deserialize)]
        struct Health {
            status: String,
        }

        match self.get("/health").await {
            Ok(response) if response.status().is_success() => response
                .json::<Health>()
                .await
                .map(|h| h.status == "ready")
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[async_trait]
impl UtxoProvider for KupoClient {
    fn name(&self) -> &'static str {
        "kupo"
    }

    async fn list(&self, address: &str) -> Result<Vec<Utxo>, ProviderError> {
        let response = self.get(&format!("/matches/{}?unspent", address)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }

        let matches: Vec<KupoMatch> = response.json().await?;
        let mut utxos = Vec::with_capacity(matches.len());
        for m in matches {
            let mut utxo = Utxo::new(m.out_ref()?, m.address.clone(), m.value()?);
            if m.has_inline_datum() {
                if let Some(hash) = &m.datum_hash {
                    if let Some(datum) = self.datum(hash).await? {
                        utxo = utxo.with_inline_datum(datum);
                    }
                }
            }
            utxos.push(utxo);
        }
        Ok(utxos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_match() {
        let policy = "cd".repeat(28);
        let raw = format!(
            r#"{{
                "transaction_index": 0,
                "transaction_id": "{}",
                "output_index": 1,
                "address": "addr_test1abc",
                "value": {{"coins": 7000000, "assets": {{"{}.6e6674": 1, "{}": 5}}}},
                "datum_hash": "{}",
                "datum_type": "inline",
                "script_hash": null
            }}"#,
            "22".repeat(32),
            policy,
            policy,
            "33".repeat(32)
        );
        let m: KupoMatch = serde_json::from_str(&raw).unwrap();
        assert!(m.has_inline_datum());
        assert_eq!(m.out_ref().unwrap(), OutRef::new([0x22; 32], 1));

        let value = m.value().unwrap();
        assert_eq!(value.coin, 7_000_000);
        assert_eq!(value.quantity_of(&AssetId::new([0xcd; 28], b"nft".to_vec())), 1);
        assert_eq!(value.quantity_of(&AssetId::new([0xcd; 28], Vec::new())), 5);
    }

    #[test]
    fn test_hash_datum_is_not_inline() {
        let raw = format!(
            r#"{{"transaction_id": "{}", "output_index": 0, "address": "a",
                 "value": {{"coins": 1}}, "datum_hash": "{}", "datum_type": "hash"}}"#,
            "00".repeat(32),
            "11".repeat(32)
        );
        let m: KupoMatch = serde_json::from_str(&raw).unwrap();
        assert!(!m.has_inline_datum());
    }

    #[test]
    fn test_bad_asset_key() {
        assert!(parse_asset_key("zz").is_err());
    }
}
