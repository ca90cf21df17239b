//! Cryptographic utilities
//!
//! Blake2b digests used by the Cardano ledger: 224-bit for key and script
//! hashes, 256-bit for transaction ids, metadata and integrity hashes.

pub mod hash;

pub use hash::{blake2b_224, blake2b_256, blake2b_256_hex, hex_to_array, HASH28_LEN, HASH32_LEN};
