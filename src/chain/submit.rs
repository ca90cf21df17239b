//! Signing and submission seams
//!
//! Keys never live in this crate. An [`ExternalSigner`] (a wallet) returns
//! a witness set for the unsigned transaction; [`attach_witnesses`] merges
//! it into the transaction and a [`TransactionSubmitter`] broadcasts it.

use super::provider::ProviderError;
use crate::codec::cbor::{Decoder, Encoder};
use crate::codec::CodecError;
use async_trait::async_trait;
use log::info;
use std::collections::BTreeMap;
use thiserror::Error;

/// Submission pipeline errors
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Signer refused or failed: {0}")]
    Signer(String),
    #[error("Witness merge failed: {0}")]
    Codec(#[from] CodecError),
    #[error("Submission failed: {0}")]
    Provider(#[from] ProviderError),
}

/// A wallet that can witness transactions on behalf of a party
#[async_trait]
pub trait ExternalSigner: Send + Sync {
    /// Return a CBOR witness set for `tx_cbor`
    async fn sign(&self, tx_cbor: &[u8]) -> Result<Vec<u8>, String>;
}

/// Broadcasts signed transactions
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Submit CBOR bytes, returning the transaction id hex
    async fn submit(&self, signed_tx: &[u8]) -> Result<String, ProviderError>;
}

fn read_map<'a>(dec: &mut Decoder<'a>) -> Result<Vec<(u64, &'a [u8])>, CodecError> {
    let mut entries = Vec::new();
    match dec.map()? {
        Some(len) => {
            for _ in 0..len {
                let key = dec.uint()?;
                entries.push((key, dec.raw_item()?));
            }
        }
        None => {
            while !dec.at_break()? {
                let key = dec.uint()?;
                entries.push((key, dec.raw_item()?));
            }
            dec.consume_break()?;
        }
    }
    Ok(entries)
}

/// Merge a signer's witness set into a transaction. Entries from the
/// signer replace entries with the same key; the body is untouched, so
/// the transaction id does not change.
pub fn attach_witnesses(tx_cbor: &[u8], witness_set: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut dec = Decoder::new(tx_cbor);
    if dec.array()? != Some(4) {
        return Err(CodecError::Malformed(
            "transaction must be a 4-element array".to_string(),
        ));
    }
    let body = dec.raw_item()?;
    let mut witnesses: BTreeMap<u64, &[u8]> = read_map(&mut dec)?.into_iter().collect();
    let is_valid = dec.raw_item()?;
    let auxiliary = dec.raw_item()?;
    dec.finish()?;

    let mut signer = Decoder::new(witness_set);
    witnesses.extend(read_map(&mut signer)?);
    signer.finish()?;

    let mut enc = Encoder::new();
    enc.array(4).raw(body).map(witnesses.len() as u64);
    for (key, value) in witnesses {
        enc.uint(key).raw(value);
    }
    enc.raw(is_valid).raw(auxiliary);
    Ok(enc.into_bytes())
}

/// Have `signer` witness the transaction, then broadcast it
pub async fn sign_and_submit(
    signer: &dyn ExternalSigner,
    submitter: &dyn TransactionSubmitter,
    tx_cbor: &[u8],
) -> Result<String, SubmitError> {
    let witness_set = signer.sign(tx_cbor).await.map_err(SubmitError::Signer)?;
    let signed = attach_witnesses(tx_cbor, &witness_set)?;
    let tx_id = submitter.submit(&signed).await?;
    info!("Submitted transaction {}", tx_id);
    Ok(tx_id)
}
