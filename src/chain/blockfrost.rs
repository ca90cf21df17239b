//! Blockfrost backend
//!
//! Answers UTXO listings, protocol parameters and transaction submission
//! from the hosted Blockfrost API.

use super::params::ParamsSource;
use super::provider::{ProviderError, UtxoProvider};
use super::submit::TransactionSubmitter;
use crate::core::address::Network;
use crate::core::fee::{ProtocolParameters, Rational};
use crate::core::transaction::{OutRef, Utxo};
use crate::core::value::{AssetId, Value, LOVELACE_UNIT};
use crate::crypto::hash::hex_to_array;
use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;

/// Blockfrost pages hold at most this many entries
const PAGE_SIZE: usize = 100;

/// Hard stop on pagination for pathological addresses
const MAX_PAGES: u32 = 50;

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct AmountEntry {
    unit: String,
    quantity: String,
}

#[derive(Debug, Deserialize)]
struct AddressUtxo {
    address: String,
    tx_hash: String,
    #[serde(alias = "tx_index")]
    output_index: u32,
    amount: Vec<AmountEntry>,
    #[serde(default)]
    inline_datum: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpochParameters {
    min_fee_a: u64,
    min_fee_b: u64,
    max_tx_size: u64,
    #[serde(default)]
    coins_per_utxo_size: Option<String>,
    #[serde(default)]
    price_mem: Option<f64>,
    #[serde(default)]
    price_step: Option<f64>,
    #[serde(default)]
    collateral_percent: Option<u64>,
    #[serde(default)]
    cost_models_raw: Option<HashMap<String, Vec<i64>>>,
}

impl AddressUtxo {
    fn into_utxo(self) -> Result<Utxo, ProviderError> {
        let tx_hash = hex_to_array::<32>(&self.tx_hash)
            .ok_or_else(|| ProviderError::Decode(format!("bad tx hash '{}'", self.tx_hash)))?;

        let mut value = Value::default();
        for entry in self.amount {
            let quantity: u64 = entry.quantity.parse().map_err(|_| {
                ProviderError::Decode(format!("bad quantity '{}'", entry.quantity))
            })?;
            if entry.unit == LOVELACE_UNIT {
                value.coin = quantity;
            } else {
                let asset = AssetId::from_unit(&entry.unit).ok_or_else(|| {
                    ProviderError::Decode(format!("bad asset unit '{}'", entry.unit))
                })?;
                value = value.with_asset(asset, quantity);
            }
        }

        let utxo = Utxo::new(OutRef::new(tx_hash, self.output_index), self.address, value);
        Ok(match self.inline_datum {
            Some(datum) => utxo.with_inline_datum(datum),
            None => utxo,
        })
    }
}

impl EpochParameters {
    /// Merge onto the static fallback; fields Blockfrost omits keep their default
    fn into_parameters(self) -> ProtocolParameters {
        let mut params = ProtocolParameters {
            min_fee_a: self.min_fee_a,
            min_fee_b: self.min_fee_b,
            max_tx_size: self.max_tx_size,
            ..ProtocolParameters::default()
        };
        if let Some(per_byte) = self.coins_per_utxo_size.and_then(|s| s.parse().ok()) {
            params.coins_per_utxo_byte = per_byte;
        }
        if let Some(price) = self.price_mem.and_then(Rational::from_decimal) {
            params.price_mem = price;
        }
        if let Some(price) = self.price_step.and_then(Rational::from_decimal) {
            params.price_step = price;
        }
        if let Some(percent) = self.collateral_percent {
            params.collateral_percent = percent;
        }
        params.cost_model_v2 = self
            .cost_models_raw
            .and_then(|mut models| models.remove("PlutusV2"));
        params
    }
}

// =============================================================================
// Client
// =============================================================================

/// Blockfrost REST client
#[derive(Clone)]
pub struct BlockfrostClient {
    base_url: String,
    project_id: String,
    client: Client,
}

impl BlockfrostClient {
    pub fn new(base_url: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            client: Client::new(),
        }
    }

    /// Client against the default endpoint for `network`
    pub fn for_network(network: Network, project_id: impl Into<String>) -> Self {
        Self::new(network.blockfrost_url(), project_id)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> Result<Response, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Blockfrost GET {}", url);
        let response = self
            .client
            .get(&url)
            .header("project_id", &self.project_id)
            .send()
            .await?;
        Ok(response)
    }

    async fn fail(response: Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        error!("Blockfrost returned {}: {}", status, body);
        ProviderError::from_status(status, body)
    }
}

#[async_trait]
impl UtxoProvider for BlockfrostClient {
    fn name(&self) -> &'static str {
        "blockfrost"
    }

    async fn list(&self, address: &str) -> Result<Vec<Utxo>, ProviderError> {
        let mut utxos = Vec::new();

        for page in 1..=MAX_PAGES {
            let path = format!(
                "/addresses/{}/utxos?count={}&page={}",
                address, PAGE_SIZE, page
            );
            let response = self.get(&path).await?;

            // Unknown address: it has never received funds
            if response.status() == StatusCode::NOT_FOUND {
                break;
            }
            if !response.status().is_success() {
                return Err(Self::fail(response).await);
            }

            let entries: Vec<AddressUtxo> = response.json().await?;
            let last_page = entries.len() < PAGE_SIZE;
            for entry in entries {
                utxos.push(entry.into_utxo()?);
            }
            if last_page {
                break;
            }
        }

        Ok(utxos)
    }
}

#[async_trait]
impl ParamsSource for BlockfrostClient {
    async fn protocol_parameters(&self) -> Result<ProtocolParameters, ProviderError> {
        let response = self.get("/epochs/latest/parameters").await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        let raw: EpochParameters = response.json().await?;
        Ok(raw.into_parameters())
    }
}

#[async_trait]
impl TransactionSubmitter for BlockfrostClient {
    async fn submit(&self, signed_tx: &[u8]) -> Result<String, ProviderError> {
        let url = format!("{}/tx/submit", self.base_url);
        debug!("Submitting {} byte transaction to Blockfrost", signed_tx.len());

        let response = self
            .client
            .post(&url)
            .header("project_id", &self.project_id)
            .header("Content-Type", "application/cbor")
            .body(signed_tx.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }

        let tx_id: String = response.json().await?;
        Ok(tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_utxo() {
        let policy = "ab".repeat(28);
        let raw = format!(
            r#"{{
                "address": "addr_test1xyz",
                "tx_hash": "{}",
                "output_index": 3,
                "amount": [
                    {{"unit": "lovelace", "quantity": "4200000"}},
                    {{"unit": "{}6e6674", "quantity": "1"}}
                ],
                "block": "b",
                "data_hash": null,
                "inline_datum": "d87980",
                "reference_script_hash": null
            }}"#,
            "11".repeat(32),
            policy
        );
        let parsed: AddressUtxo = serde_json::from_str(&raw).unwrap();
        let utxo = parsed.into_utxo().unwrap();

        assert_eq!(utxo.out_ref, OutRef::new([0x11; 32], 3));
        assert_eq!(utxo.value.coin, 4_200_000);
        let asset = AssetId::new([0xab; 28], b"nft".to_vec());
        assert_eq!(utxo.value.quantity_of(&asset), 1);
        assert_eq!(utxo.inline_datum.as_deref(), Some("d87980"));
    }

    #[test]
    fn test_rejects_bad_quantity() {
        let raw = format!(
            r#"{{"address": "a", "tx_hash": "{}", "output_index": 0,
                 "amount": [{{"unit": "lovelace", "quantity": "lots"}}]}}"#,
            "00".repeat(32)
        );
        let parsed: AddressUtxo = serde_json::from_str(&raw).unwrap();
        assert!(matches!(parsed.into_utxo(), Err(ProviderError::Decode(_))));
    }

    #[test]
    fn test_parameters_merge_onto_fallback() {
        let raw = r#"{
            "min_fee_a": 44,
            "min_fee_b": 155381,
            "max_tx_size": 16384,
            "coins_per_utxo_size": "4310",
            "price_mem": 0.0577,
            "price_step": 0.0000721,
            "collateral_percent": 150,
            "cost_models_raw": {"PlutusV2": [1, 2, 3]}
        }"#;
        let parsed: EpochParameters = serde_json::from_str(raw).unwrap();
        let params = parsed.into_parameters();

        assert_eq!(params.min_fee_a, 44);
        assert_eq!(params.price_mem, Rational::new(577, 10_000));
        assert_eq!(params.price_step, Rational::new(721, 10_000_000));
        assert_eq!(params.cost_model_v2, Some(vec![1, 2, 3]));
        assert_eq!(params.min_utxo_floor, ProtocolParameters::default().min_utxo_floor);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = BlockfrostClient::new("http://localhost:3000/", "key");
        assert_eq!(client.base_url(), "http://localhost:3000");
    }
}
