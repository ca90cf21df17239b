//! On-chain data codecs
//!
//! This module contains:
//! - A minimal CBOR reader/writer
//! - Plutus structured data (`Constr` / `Map` / `List` / `Integer` / `Bytes`)
//! - The escrow datum, escrow redeemer and mint redeemer layouts expected by
//!   the deployed validators
//! - CIP-25 transaction metadata

pub mod cbor;
pub mod datum;
pub mod metadata;
pub mod plutus_data;

use thiserror::Error;

pub use cbor::{Decoder, Encoder};
pub use datum::{
    session_id_bytes, EscrowDatum, EscrowRedeemer, MintRedeemer, ESCROW_DATUM_FIELDS,
};
pub use metadata::{AuxiliaryData, Metadatum, SessionTokenMetadata, CIP25_LABEL};
pub use plutus_data::PlutusData;

/// Errors raised while decoding or encoding on-chain data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Unexpected CBOR type: expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Malformed CBOR: {0}")]
    Malformed(String),
    #[error("{0} trailing bytes after data item")]
    TrailingBytes(usize),
    #[error("Integer does not fit in 128 bits")]
    IntegerOverflow,
    #[error("Structure nested deeper than {0} levels")]
    NestingTooDeep(usize),
    #[error("Malformed datum: {0}")]
    MalformedDatum(String),
    #[error("Unknown constructor index {index} for {context}")]
    UnknownConstructorIndex { context: &'static str, index: u64 },
}
