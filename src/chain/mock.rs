//! In-memory ledger for tests and local runs
//!
//! Holds a UTXO set keyed by address. `apply` plays a draft against it the
//! way the chain would: inputs disappear, outputs appear under the draft's
//! transaction id.

use super::provider::{ProviderError, UtxoProvider};
use crate::core::transaction::{OutRef, TransactionDraft, Utxo};
use crate::core::value::Value;
use crate::crypto::hash::blake2b_256;
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Ledger {
    utxos: HashMap<String, Vec<Utxo>>,
    /// Monotonic counter used to derive synthetic transaction hashes
    nonce: u64,
    /// When set, every `list` fails with this error
    failure: Option<ProviderError>,
}

/// In-memory UTXO backend
#[derive(Debug, Default)]
pub struct MockProvider {
    ledger: RwLock<Ledger>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh output at `address`, as if received from a faucet
    pub async fn credit(&self, address: &str, value: Value) -> OutRef {
        let mut ledger = self.ledger.write().await;
        ledger.nonce += 1;
        let mut seed = b"mock-credit".to_vec();
        seed.extend_from_slice(&ledger.nonce.to_be_bytes());
        let out_ref = OutRef::new(blake2b_256(&seed), 0);

        ledger
            .utxos
            .entry(address.to_string())
            .or_default()
            .push(Utxo::new(out_ref, address, value));
        out_ref
    }

    /// Insert a fully formed UTXO
    pub async fn insert(&self, utxo: Utxo) {
        let mut ledger = self.ledger.write().await;
        ledger
            .utxos
            .entry(utxo.address.clone())
            .or_default()
            .push(utxo);
    }

    /// Remove an output wherever it lives. Returns whether it existed.
    pub async fn spend(&self, out_ref: &OutRef) -> bool {
        let mut ledger = self.ledger.write().await;
        let mut found = false;
        for utxos in ledger.utxos.values_mut() {
            let before = utxos.len();
            utxos.retain(|u| &u.out_ref != out_ref);
            found |= utxos.len() != before;
        }
        found
    }

    /// Apply a draft: consume its inputs and create its outputs.
    ///
    /// Fails if any input is no longer unspent, mirroring the ledger's
    /// double-spend rejection.
    pub async fn apply(&self, draft: &TransactionDraft) -> Result<[u8; 32], ProviderError> {
        let mut ledger = self.ledger.write().await;
        for input in &draft.inputs {
            let present = ledger
                .utxos
                .values()
                .any(|set| set.iter().any(|u| u.out_ref == input.out_ref));
            if !present {
                return Err(ProviderError::Http {
                    status: 400,
                    body: format!("input {} already spent", input.out_ref),
                });
            }
        }

        for input in &draft.inputs {
            for set in ledger.utxos.values_mut() {
                set.retain(|u| u.out_ref != input.out_ref);
            }
        }

        let tx_id = draft.tx_id();
        for (index, output) in draft.outputs.iter().enumerate() {
            let address = output
                .address_bech32()
                .map_err(|e| ProviderError::Decode(e.to_string()))?;
            let mut utxo = Utxo::new(
                OutRef::new(tx_id, index as u32),
                address.clone(),
                output.value.clone(),
            );
            if let Some(datum) = &output.inline_datum {
                utxo = utxo.with_inline_datum(hex::encode(datum.to_cbor()));
            }
            ledger.utxos.entry(address).or_default().push(utxo);
        }

        debug!(
            "Mock ledger applied {} ({} in, {} out)",
            hex::encode(tx_id),
            draft.inputs.len(),
            draft.outputs.len()
        );
        Ok(tx_id)
    }

    /// Make subsequent listings fail, or clear the failure with `None`
    pub async fn set_failure(&self, failure: Option<ProviderError>) {
        self.ledger.write().await.failure = failure;
    }
}

#[async_trait]
impl UtxoProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list(&self, address: &str) -> Result<Vec<Utxo>, ProviderError> {
        let ledger = self.ledger.read().await;
        if let Some(err) = &ledger.failure {
            return Err(err.clone());
        }
        Ok(ledger.utxos.get(address).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_credit_and_spend() {
        let mock = MockProvider::new();
        let a = mock.credit("addr_test1a", Value::lovelace(5)).await;
        let b = mock.credit("addr_test1a", Value::lovelace(7)).await;
        assert_ne!(a, b);
        assert_eq!(mock.list("addr_test1a").await.unwrap().len(), 2);

        assert!(mock.spend(&a).await);
        assert!(!mock.spend(&a).await);
        let left = mock.list("addr_test1a").await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].out_ref, b);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mock = MockProvider::new();
        mock.set_failure(Some(ProviderError::RateLimited { status: 429 }))
            .await;
        assert!(mock.list("addr_test1a").await.is_err());
        mock.set_failure(None).await;
        assert!(mock.list("addr_test1a").await.unwrap().is_empty());
    }
}
