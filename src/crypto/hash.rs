//! Ledger hashing utilities
//!
//! Cardano identifies credentials, scripts and policies by BLAKE2b-224
//! digests, and transactions, auxiliary data and script-integrity
//! commitments by BLAKE2b-256 digests.

use blake2::digest::consts::{U28, U32};
use blake2::{Blake2b, Digest};

/// Length of a credential / script / policy hash
pub const HASH28_LEN: usize = 28;

/// Length of a transaction / data hash
pub const HASH32_LEN: usize = 32;

type Blake2b224 = Blake2b<U28>;
type Blake2b256 = Blake2b<U32>;

/// Computes the BLAKE2b-224 digest of the input data
pub fn blake2b_224(data: &[u8]) -> [u8; HASH28_LEN] {
    let mut hasher = Blake2b224::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes the BLAKE2b-256 digest of the input data
pub fn blake2b_256(data: &[u8]) -> [u8; HASH32_LEN] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// BLAKE2b-256 digest as a lowercase hex string
pub fn blake2b_256_hex(data: &[u8]) -> String {
    hex::encode(blake2b_256(data))
}

/// Decode a hex string into a fixed-size array, `None` on any length or
/// alphabet mismatch
pub fn hex_to_array<const N: usize>(value: &str) -> Option<[u8; N]> {
    let bytes = hex::decode(value).ok()?;
    bytes.try_into().ok()
}

/// Serde adapter storing fixed-size byte arrays as hex strings
pub mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::hex_to_array::<N>(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("expected {} hex-encoded bytes", N))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake2b_224_empty() {
        assert_eq!(
            hex::encode(blake2b_224(b"")),
            "836cc68931c2e4e3e838602eca1902591d216837bafddfe6f0c8cb07"
        );
    }

    #[test]
    fn test_blake2b_256_empty() {
        assert_eq!(
            blake2b_256_hex(b""),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
    }

    #[test]
    fn test_hex_to_array() {
        let parsed: Option<[u8; 2]> = hex_to_array("abcd");
        assert_eq!(parsed, Some([0xab, 0xcd]));
        assert!(hex_to_array::<3>("abcd").is_none());
        assert!(hex_to_array::<2>("zz00").is_none());
    }
}
