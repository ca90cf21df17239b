//! Chain access
//!
//! This module contains:
//! - The `UtxoProvider` capability and its error type
//! - Backends: Blockfrost, Kupo and an in-memory mock
//! - A TTL cache with stale fallback in front of any backend
//! - Protocol parameter sources with a static fallback
//! - Signing and submission seams

pub mod blockfrost;
pub mod cache;
pub mod kupo;
pub mod mock;
pub mod params;
pub mod provider;
pub mod submit;

pub use blockfrost::BlockfrostClient;
pub use cache::{CacheStats, CachedProvider, Freshness, UtxoListing};
pub use kupo::KupoClient;
pub use mock::MockProvider;
pub use params::{load_parameters, ParamsSource, StaticParams};
pub use provider::{ProviderError, UtxoProvider};
pub use submit::{attach_witnesses, sign_and_submit, ExternalSigner, SubmitError, TransactionSubmitter};
