//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Addresses (bech32 Shelley addresses, payment key hash extraction)
//! - Multi-asset values
//! - Plutus V2 scripts and script addresses
//! - Protocol parameters and the fee model
//! - Transaction drafts and their ledger serialization
//! - Deterministic coin selection
//! - The transaction builder and the protocol context it runs against

pub mod address;
pub mod builder;
pub mod context;
pub mod fee;
pub mod script;
pub mod selection;
pub mod transaction;
pub mod value;

pub use address::{payment_key_hash, script_address, Address, AddressError, AddressKind, Credential, Network};
pub use builder::{BuilderError, MintRequest, ScriptSpend, TransactionBuilder, MAX_FEE_ITERATIONS};
pub use context::{ContextError, ExecutionBudgets, ProtocolContext, Receiver};
pub use fee::{ExUnits, ProtocolParameters, Rational};
pub use script::{PlutusScript, ScriptError};
pub use selection::{largest_first, select_collateral, SelectionStrategy};
pub use transaction::{
    OutRef, Redeemer, RedeemerTag, TransactionDraft, TransactionError, TxOutput, Utxo,
};
pub use value::{AssetId, Value};
