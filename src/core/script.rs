//! Plutus V2 validator and minting policy scripts
//!
//! Scripts are loaded from text envelopes (`{"type", "description",
//! "cborHex"}`) or from bare hex. Envelopes double-wrap the flat program in
//! CBOR byte strings; the witness set and the script hash use the program
//! with exactly one wrapping left.

use super::address::{script_address, AddressError, Network};
use crate::codec::cbor::{Decoder, MAJOR_BYTES};
use crate::crypto::hash::{blake2b_224, HASH28_LEN};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Language tag prefixed to the script bytes before hashing
pub const PLUTUS_V2_TAG: u8 = 0x02;

/// Script loading errors
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Script file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid script envelope: {0}")]
    InvalidEnvelope(String),
    #[error("Unsupported script type: {0}")]
    UnsupportedType(String),
    #[error("Script bytes are not valid hex or CBOR: {0}")]
    InvalidBytes(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextEnvelope {
    #[serde(rename = "type", default)]
    script_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    cbor_hex: Option<String>,
}

/// A Plutus V2 script in witness-set form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlutusScript {
    bytes: Vec<u8>,
    description: Option<String>,
}

impl PlutusScript {
    /// Load from a `.plutus` envelope or a file holding bare hex
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_text(&content)
    }

    /// Parse file contents: JSON envelope when it looks like JSON, hex otherwise
    pub fn from_text(content: &str) -> Result<Self, ScriptError> {
        let trimmed = content.trim();
        if !trimmed.starts_with('{') {
            return Self::from_cbor_hex(trimmed);
        }

        let envelope: TextEnvelope = serde_json::from_str(trimmed)
            .map_err(|e| ScriptError::InvalidEnvelope(e.to_string()))?;
        if let Some(kind) = &envelope.script_type {
            if kind != "PlutusScriptV2" {
                return Err(ScriptError::UnsupportedType(kind.clone()));
            }
        }
        let cbor_hex = envelope
            .cbor_hex
            .ok_or_else(|| ScriptError::InvalidEnvelope("missing cborHex field".to_string()))?;
        let mut script = Self::from_cbor_hex(&cbor_hex)?;
        script.description = envelope.description;
        Ok(script)
    }

    /// Accepts the program wrapped once or twice in CBOR byte strings
    pub fn from_cbor_hex(value: &str) -> Result<Self, ScriptError> {
        let raw = hex::decode(value.trim()).map_err(|e| ScriptError::InvalidBytes(e.to_string()))?;
        let once = unwrap_bytes(&raw).ok_or_else(|| {
            ScriptError::InvalidBytes("expected a CBOR byte string".to_string())
        })?;
        let bytes = if unwrap_bytes(&once).is_some() {
            once
        } else {
            raw
        };
        Ok(Self {
            bytes,
            description: None,
        })
    }

    /// Script bytes as they appear in the witness set
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// blake2b-224 over the language tag and the script bytes.
    /// Doubles as the policy id for minting policies.
    pub fn hash(&self) -> [u8; HASH28_LEN] {
        let mut preimage = Vec::with_capacity(self.bytes.len() + 1);
        preimage.push(PLUTUS_V2_TAG);
        preimage.extend_from_slice(&self.bytes);
        blake2b_224(&preimage)
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    /// Escrow address locking funds under this validator
    pub fn address(&self, network: Network) -> Result<String, AddressError> {
        script_address(self.hash(), network)
    }
}

/// Contents of `data` when it is exactly one CBOR byte string
fn unwrap_bytes(data: &[u8]) -> Option<Vec<u8>> {
    let mut dec = Decoder::new(data);
    if dec.peek_major().ok()? != MAJOR_BYTES {
        return None;
    }
    let inner = dec.bytes().ok()?;
    dec.finish().ok()?;
    Some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::cbor::Encoder;

    fn wrapped(program: &[u8]) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.bytes(program);
        enc.into_bytes()
    }

    #[test]
    fn test_single_and_double_wrapping_agree() {
        let flat = vec![0x01, 0x00, 0x00, 0x32, 0x22, 0x00, 0x11];
        let single = wrapped(&flat);
        let double = wrapped(&single);

        let a = PlutusScript::from_cbor_hex(&hex::encode(&single)).unwrap();
        let b = PlutusScript::from_cbor_hex(&hex::encode(&double)).unwrap();
        assert_eq!(a.as_bytes(), single.as_slice());
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_includes_language_tag() {
        let script = PlutusScript::from_cbor_hex(&hex::encode(wrapped(&[0x01]))).unwrap();
        let mut preimage = vec![PLUTUS_V2_TAG];
        preimage.extend_from_slice(script.as_bytes());
        assert_eq!(script.hash(), blake2b_224(&preimage));
    }

    #[test]
    fn test_envelope_parsing() {
        let cbor = hex::encode(wrapped(&wrapped(&[0x01, 0x02])));
        let text = format!(
            r#"{{"type": "PlutusScriptV2", "description": "escrow", "cborHex": "{}"}}"#,
            cbor
        );
        let script = PlutusScript::from_text(&text).unwrap();
        assert_eq!(script.description(), Some("escrow"));
        assert_eq!(script.as_bytes(), wrapped(&[0x01, 0x02]).as_slice());

        let v1 = r#"{"type": "PlutusScriptV1", "cborHex": "4100"}"#;
        assert!(matches!(
            PlutusScript::from_text(v1),
            Err(ScriptError::UnsupportedType(_))
        ));
        assert!(matches!(
            PlutusScript::from_text(r#"{"type": "PlutusScriptV2"}"#),
            Err(ScriptError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_bad_hex() {
        assert!(PlutusScript::from_text("zz").is_err());
        assert!(PlutusScript::from_text("01").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("escrow.plutus");
        fs::write(&path, hex::encode(wrapped(&[0x05]))).unwrap();
        let script = PlutusScript::from_file(&path).unwrap();
        assert!(script
            .address(Network::Preprod)
            .unwrap()
            .starts_with("addr_test1"));
        assert!(PlutusScript::from_file(dir.path().join("missing")).is_err());
    }
}
