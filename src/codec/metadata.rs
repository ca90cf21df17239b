//! Transaction metadata (auxiliary data)
//!
//! Provides the ledger metadatum type, conversion from JSON and the CIP-25
//! token metadata attached to session token mints. The ledger caps text and
//! byte strings at 64 bytes, so longer strings are split into lists of
//! chunks as CIP-25 prescribes.

use super::cbor::Encoder;
use crate::crypto::hash::{blake2b_256, HASH28_LEN, HASH32_LEN};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;

/// Metadata label reserved for NFT metadata
pub const CIP25_LABEL: u64 = 721;

/// Maximum text or byte string length inside a metadatum
pub const METADATA_STRING_LIMIT: usize = 64;

/// A transaction metadatum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadatum {
    Int(i128),
    Bytes(Vec<u8>),
    Text(String),
    List(Vec<Metadatum>),
    Map(Vec<(Metadatum, Metadatum)>),
}

impl Metadatum {
    /// Text metadatum, chunked into a list when longer than the ledger limit
    pub fn text(value: &str) -> Self {
        if value.len() <= METADATA_STRING_LIMIT {
            return Metadatum::Text(value.to_string());
        }
        Metadatum::List(
            chunk_str(value, METADATA_STRING_LIMIT)
                .into_iter()
                .map(|c| Metadatum::Text(c.to_string()))
                .collect(),
        )
    }

    /// Convert a JSON document using the "no schema" mapping: strings become
    /// text, integers become ints, objects become maps with text keys.
    /// Booleans, floats and nulls have no metadatum form and are rendered as
    /// text.
    pub fn from_json(value: &Json) -> Self {
        match value {
            Json::String(s) => Metadatum::text(s),
            Json::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Metadatum::Int(i128::from(i)),
                (None, Some(u)) => Metadatum::Int(i128::from(u)),
                _ => Metadatum::text(&n.to_string()),
            },
            Json::Array(items) => Metadatum::List(items.iter().map(Metadatum::from_json).collect()),
            Json::Object(map) => Metadatum::Map(
                map.iter()
                    .map(|(k, v)| (Metadatum::text(k), Metadatum::from_json(v)))
                    .collect(),
            ),
            Json::Bool(b) => Metadatum::Text(b.to_string()),
            Json::Null => Metadatum::Text(String::new()),
        }
    }

    pub fn encode(&self, enc: &mut Encoder) {
        match self {
            Metadatum::Int(i) => {
                enc.int(*i);
            }
            Metadatum::Bytes(b) => {
                if b.len() <= METADATA_STRING_LIMIT {
                    enc.bytes(b);
                } else {
                    let chunks: Vec<&[u8]> = b.chunks(METADATA_STRING_LIMIT).collect();
                    enc.array(chunks.len() as u64);
                    for chunk in chunks {
                        enc.bytes(chunk);
                    }
                }
            }
            Metadatum::Text(s) => {
                enc.text(s);
            }
            Metadatum::List(items) => {
                enc.array(items.len() as u64);
                for item in items {
                    item.encode(enc);
                }
            }
            Metadatum::Map(entries) => {
                enc.map(entries.len() as u64);
                for (k, v) in entries {
                    k.encode(enc);
                    v.encode(enc);
                }
            }
        }
    }
}

/// Split on char boundaries into pieces of at most `limit` bytes
fn chunk_str(value: &str, limit: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < value.len() {
        let mut end = (start + limit).min(value.len());
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(&value[start..end]);
        start = end;
    }
    chunks
}

// =============================================================================
// Auxiliary Data
// =============================================================================

/// Labelled metadata attached to a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuxiliaryData {
    pub metadata: BTreeMap<u64, Metadatum>,
}

impl AuxiliaryData {
    pub fn with_label(mut self, label: u64, value: Metadatum) -> Self {
        self.metadata.insert(label, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.map(self.metadata.len() as u64);
        for (label, value) in &self.metadata {
            enc.uint(*label);
            value.encode(enc);
        }
    }

    pub fn to_cbor(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.into_bytes()
    }

    /// Hash committed in the transaction body
    pub fn hash(&self) -> [u8; HASH32_LEN] {
        blake2b_256(&self.to_cbor())
    }
}

// =============================================================================
// Session Token Metadata
// =============================================================================

/// CIP-25 metadata describing a proof-of-session token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokenMetadata {
    pub policy_id: [u8; HASH28_LEN],
    pub asset_name: String,
    pub skill: String,
    pub provider: String,
    pub budget_lovelace: u64,
    pub duration_minutes: u32,
    pub session_date: DateTime<Utc>,
    /// Escrow output the token attests to, `txhash#index`
    pub escrow_ref: Option<String>,
    /// Opaque content handles, not interpreted here
    pub image_cid: Option<String>,
    pub metadata_cid: Option<String>,
}

impl SessionTokenMetadata {
    pub fn display_name(&self) -> String {
        format!("SkillForge Session - {} with {}", self.skill, self.provider)
    }

    pub fn to_json(&self) -> Json {
        let mut token = Map::new();
        token.insert("name".into(), json!(self.display_name()));
        token.insert(
            "description".into(),
            json!("Proof-of-session token minted by SkillForge to attest a mentoring session on Cardano."),
        );
        if let Some(cid) = &self.image_cid {
            token.insert("image".into(), json!(format!("ipfs://{}", cid)));
            token.insert("mediaType".into(), json!("image/png"));
        }
        token.insert("provider".into(), json!(self.provider));
        token.insert("skill".into(), json!(self.skill));
        token.insert(
            "sessionDate".into(),
            json!(self.session_date.format("%Y-%m-%d").to_string()),
        );
        token.insert(
            "attributes".into(),
            json!([
                { "trait_type": "provider", "value": self.provider },
                { "trait_type": "skill", "value": self.skill },
                { "trait_type": "budget", "value": self.budget_lovelace },
                { "trait_type": "duration_minutes", "value": self.duration_minutes },
            ]),
        );
        if let Some(escrow_ref) = &self.escrow_ref {
            token.insert("escrow".into(), json!(escrow_ref));
        }
        if let Some(cid) = &self.metadata_cid {
            token.insert("metadata".into(), json!(format!("ipfs://{}", cid)));
        }

        let mut assets = Map::new();
        assets.insert(self.asset_name.clone(), Json::Object(token));
        let mut policies = Map::new();
        policies.insert(hex::encode(self.policy_id), Json::Object(assets));
        policies.insert("version".into(), json!("1.0"));
        Json::Object(policies)
    }

    pub fn to_auxiliary_data(&self) -> AuxiliaryData {
        AuxiliaryData::default().with_label(CIP25_LABEL, Metadatum::from_json(&self.to_json()))
    }
}
