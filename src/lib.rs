//! SkillForge escrow: tutoring session payments held by a Plutus validator
//!
//! This crate builds the Cardano transactions behind a SkillForge session:
//! - Session and escrow state machines with forward-only persistence
//! - Escrow datum and redeemer codecs matching the deployed validator
//! - Lock, attestation, claim and refund transactions against the escrow script
//! - Proof-of-session token mints with CIP-25 metadata
//! - Cached UTXO lookups over Blockfrost, Kupo or an in-memory ledger
//! - Per-session locking and spend reservations
//!
//! Transactions are returned unsigned; signing always happens in an
//! external wallet.
//!
//! # Example
//!
//! ```rust,no_run
//! use skillforge_escrow::chain::{CachedProvider, MockProvider};
//! use skillforge_escrow::core::{ProtocolContext, ProtocolParameters, Network};
//! use skillforge_escrow::escrow::{EscrowService, NewSession};
//! use skillforge_escrow::storage::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), skillforge_escrow::EscrowError> {
//! let ctx = ProtocolContext::new(Network::Preprod, ProtocolParameters::default());
//! let utxos = Arc::new(CachedProvider::new(Arc::new(MockProvider::new())));
//! let service = EscrowService::new(ctx, utxos, Arc::new(MemoryStore::new()));
//!
//! let session = service
//!     .create_session(NewSession {
//!         learner_id: "learner-1".into(),
//!         provider_id: "mentor-7".into(),
//!         skill: "Rust".into(),
//!         budget_lovelace: 25_000_000,
//!         duration_minutes: None,
//!     })
//!     .await?;
//! println!("Session {} is {}", session.id, session.status);
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod cli;
pub mod codec;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod escrow;
pub mod storage;

// Re-export commonly used types
pub use chain::{CachedProvider, ProviderError, UtxoProvider};
pub use codec::{EscrowDatum, EscrowRedeemer, MintRedeemer, PlutusData};
pub use config::AppConfig;
pub use core::{ProtocolContext, TransactionBuilder, TransactionDraft};
pub use error::{ErrorKind, EscrowError};
pub use escrow::{EscrowService, Party, Session, SessionStatus};
pub use storage::{EscrowStore, JsonFileStore, MemoryStore};
