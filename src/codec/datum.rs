//! Escrow datum and redeemer layouts
//!
//! These are a cross-system contract with the deployed validators: field
//! order, constructor indices and the boolean convention must not change.
//!
//! ```text
//! EscrowDatum = Constr 0
//!   [ learner  : bytes(28)
//!   , mentor   : bytes(28)
//!   , price    : int
//!   , session  : bytes(16)
//!   , learner_attested : Bool
//!   , mentor_attested  : Bool
//!   , receiver : bytes(28) ]
//!
//! Bool = Constr 0 [] (False) | Constr 1 [] (True)
//! EscrowRedeemer = AttestByLearner | AttestByMentor | ClaimFunds | Refund
//! MintRedeemer = Constr 0 [ session : bytes(16) ]
//! ```

use super::plutus_data::PlutusData;
use super::CodecError;
use crate::crypto::hash::{hex_array, HASH28_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of fields carried by the escrow datum constructor
pub const ESCROW_DATUM_FIELDS: usize = 7;

/// Raw session identifier length (a UUID without separators)
pub const SESSION_ID_LEN: usize = 16;

const FALSE_INDEX: u64 = 0;
const TRUE_INDEX: u64 = 1;

/// The 16 raw bytes of a session UUID, as placed on chain
pub fn session_id_bytes(id: &Uuid) -> [u8; SESSION_ID_LEN] {
    *id.as_bytes()
}

// =============================================================================
// Escrow Datum
// =============================================================================

/// Inline datum attached to the escrow script output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowDatum {
    #[serde(with = "hex_array")]
    pub learner_key_hash: [u8; HASH28_LEN],
    #[serde(with = "hex_array")]
    pub mentor_key_hash: [u8; HASH28_LEN],
    pub price_lovelace: u64,
    #[serde(with = "hex_array")]
    pub session_id: [u8; SESSION_ID_LEN],
    pub learner_attested: bool,
    pub mentor_attested: bool,
    #[serde(with = "hex_array")]
    pub receiver_key_hash: [u8; HASH28_LEN],
}

impl EscrowDatum {
    /// A fresh datum with neither party attested
    pub fn new(
        learner_key_hash: [u8; HASH28_LEN],
        mentor_key_hash: [u8; HASH28_LEN],
        price_lovelace: u64,
        session: &Uuid,
        receiver_key_hash: [u8; HASH28_LEN],
    ) -> Self {
        Self {
            learner_key_hash,
            mentor_key_hash,
            price_lovelace,
            session_id: session_id_bytes(session),
            learner_attested: false,
            mentor_attested: false,
            receiver_key_hash,
        }
    }

    pub fn session_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.session_id)
    }

    pub fn both_attested(&self) -> bool {
        self.learner_attested && self.mentor_attested
    }

    /// Copy with the learner flag set; the mentor flag is carried over
    pub fn with_learner_attested(mut self) -> Self {
        self.learner_attested = true;
        self
    }

    /// Copy with the mentor flag set; the learner flag is carried over
    pub fn with_mentor_attested(mut self) -> Self {
        self.mentor_attested = true;
        self
    }

    pub fn to_plutus_data(&self) -> PlutusData {
        PlutusData::constr(
            0,
            vec![
                PlutusData::Bytes(self.learner_key_hash.to_vec()),
                PlutusData::Bytes(self.mentor_key_hash.to_vec()),
                PlutusData::Integer(i128::from(self.price_lovelace)),
                PlutusData::Bytes(self.session_id.to_vec()),
                encode_bool(self.learner_attested),
                encode_bool(self.mentor_attested),
                PlutusData::Bytes(self.receiver_key_hash.to_vec()),
            ],
        )
    }

    pub fn from_plutus_data(data: &PlutusData) -> Result<Self, CodecError> {
        let (tag, fields) = data
            .as_constr()
            .ok_or_else(|| CodecError::MalformedDatum("datum is not a constructor".to_string()))?;
        if tag != 0 {
            return Err(CodecError::UnknownConstructorIndex {
                context: "EscrowDatum",
                index: tag,
            });
        }
        if fields.len() != ESCROW_DATUM_FIELDS {
            return Err(CodecError::MalformedDatum(format!(
                "expected {} fields, found {}",
                ESCROW_DATUM_FIELDS,
                fields.len()
            )));
        }

        let price = fields[2]
            .as_integer()
            .ok_or_else(|| CodecError::MalformedDatum("price is not an integer".to_string()))?;
        let price_lovelace = u64::try_from(price).map_err(|_| {
            CodecError::MalformedDatum(format!("price {} is outside the lovelace range", price))
        })?;

        Ok(Self {
            learner_key_hash: fixed_bytes(&fields[0], "learner key hash")?,
            mentor_key_hash: fixed_bytes(&fields[1], "mentor key hash")?,
            price_lovelace,
            session_id: fixed_bytes(&fields[3], "session id")?,
            learner_attested: decode_bool(&fields[4])?,
            mentor_attested: decode_bool(&fields[5])?,
            receiver_key_hash: fixed_bytes(&fields[6], "receiver key hash")?,
        })
    }

    pub fn to_cbor(&self) -> Vec<u8> {
        self.to_plutus_data().to_cbor()
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_plutus_data(&PlutusData::from_cbor(bytes)?)
    }

    pub fn to_cbor_hex(&self) -> String {
        hex::encode(self.to_cbor())
    }

    pub fn from_cbor_hex(value: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(value)
            .map_err(|e| CodecError::MalformedDatum(format!("datum is not hex: {}", e)))?;
        Self::from_cbor(&bytes)
    }
}

fn encode_bool(value: bool) -> PlutusData {
    PlutusData::unit_constr(if value { TRUE_INDEX } else { FALSE_INDEX })
}

fn decode_bool(data: &PlutusData) -> Result<bool, CodecError> {
    match data.as_constr() {
        Some((FALSE_INDEX, [])) => Ok(false),
        Some((TRUE_INDEX, [])) => Ok(true),
        Some((FALSE_INDEX | TRUE_INDEX, _)) => Err(CodecError::MalformedDatum(
            "boolean constructor carries fields".to_string(),
        )),
        Some((index, _)) => Err(CodecError::UnknownConstructorIndex {
            context: "Bool",
            index,
        }),
        None => Err(CodecError::MalformedDatum(
            "boolean is not a constructor".to_string(),
        )),
    }
}

fn fixed_bytes<const N: usize>(data: &PlutusData, what: &str) -> Result<[u8; N], CodecError> {
    let bytes = data
        .as_bytes()
        .ok_or_else(|| CodecError::MalformedDatum(format!("{} is not a byte string", what)))?;
    bytes.try_into().map_err(|_| {
        CodecError::MalformedDatum(format!(
            "{} must be {} bytes, found {}",
            what,
            N,
            bytes.len()
        ))
    })
}

// =============================================================================
// Redeemers
// =============================================================================

/// Spending action for the escrow validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowRedeemer {
    AttestByLearner,
    AttestByMentor,
    ClaimFunds,
    Refund,
}

impl EscrowRedeemer {
    pub const ALL: [EscrowRedeemer; 4] = [
        EscrowRedeemer::AttestByLearner,
        EscrowRedeemer::AttestByMentor,
        EscrowRedeemer::ClaimFunds,
        EscrowRedeemer::Refund,
    ];

    /// Constructor index understood by the validator
    pub fn index(&self) -> u64 {
        match self {
            EscrowRedeemer::AttestByLearner => 0,
            EscrowRedeemer::AttestByMentor => 1,
            EscrowRedeemer::ClaimFunds => 2,
            EscrowRedeemer::Refund => 3,
        }
    }

    pub fn from_index(index: u64) -> Result<Self, CodecError> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.index() == index)
            .ok_or(CodecError::UnknownConstructorIndex {
                context: "EscrowRedeemer",
                index,
            })
    }

    pub fn to_plutus_data(&self) -> PlutusData {
        PlutusData::unit_constr(self.index())
    }

    pub fn from_plutus_data(data: &PlutusData) -> Result<Self, CodecError> {
        match data.as_constr() {
            Some((index, [])) => Self::from_index(index),
            Some(_) => Err(CodecError::MalformedDatum(
                "escrow redeemer carries fields".to_string(),
            )),
            None => Err(CodecError::MalformedDatum(
                "escrow redeemer is not a constructor".to_string(),
            )),
        }
    }

    pub fn to_cbor(&self) -> Vec<u8> {
        self.to_plutus_data().to_cbor()
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_plutus_data(&PlutusData::from_cbor(bytes)?)
    }
}

impl fmt::Display for EscrowRedeemer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EscrowRedeemer::AttestByLearner => "AttestByLearner",
            EscrowRedeemer::AttestByMentor => "AttestByMentor",
            EscrowRedeemer::ClaimFunds => "ClaimFunds",
            EscrowRedeemer::Refund => "Refund",
        };
        write!(f, "{}", name)
    }
}

/// Redeemer for the session token minting policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintRedeemer {
    pub session_id: [u8; SESSION_ID_LEN],
}

impl MintRedeemer {
    pub fn new(session: &Uuid) -> Self {
        Self {
            session_id: session_id_bytes(session),
        }
    }

    pub fn to_plutus_data(&self) -> PlutusData {
        PlutusData::constr(0, vec![PlutusData::Bytes(self.session_id.to_vec())])
    }

    pub fn from_plutus_data(data: &PlutusData) -> Result<Self, CodecError> {
        match data.as_constr() {
            Some((0, [field])) => Ok(Self {
                session_id: fixed_bytes(field, "session id")?,
            }),
            Some((0, fields)) => Err(CodecError::MalformedDatum(format!(
                "mint redeemer expects 1 field, found {}",
                fields.len()
            ))),
            Some((index, _)) => Err(CodecError::UnknownConstructorIndex {
                context: "MintRedeemer",
                index,
            }),
            None => Err(CodecError::MalformedDatum(
                "mint redeemer is not a constructor".to_string(),
            )),
        }
    }

    pub fn to_cbor(&self) -> Vec<u8> {
        self.to_plutus_data().to_cbor()
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_plutus_data(&PlutusData::from_cbor(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EscrowDatum {
        EscrowDatum {
            learner_key_hash: [0x11; HASH28_LEN],
            mentor_key_hash: [0x22; HASH28_LEN],
            price_lovelace: 10_000_000,
            session_id: [0xab; SESSION_ID_LEN],
            learner_attested: false,
            mentor_attested: true,
            receiver_key_hash: [0x33; HASH28_LEN],
        }
    }

    #[test]
    fn test_datum_exact_bytes() {
        let expected = format!(
            "d8799f581c{}581c{}1a0098968050{}d87980d87a80581c{}ff",
            "11".repeat(28),
            "22".repeat(28),
            "ab".repeat(16),
            "33".repeat(28)
        );
        assert_eq!(sample().to_cbor_hex(), expected);
    }

    #[test]
    fn test_datum_decode_inverts_encode() {
        let mut datum = sample();
        for (learner, mentor) in [(false, false), (true, false), (false, true), (true, true)] {
            datum.learner_attested = learner;
            datum.mentor_attested = mentor;
            assert_eq!(EscrowDatum::from_cbor(&datum.to_cbor()).unwrap(), datum);
        }
        datum.price_lovelace = u64::MAX;
        assert_eq!(EscrowDatum::from_cbor(&datum.to_cbor()).unwrap(), datum);
    }

    #[test]
    fn test_boolean_convention() {
        assert_eq!(hex::encode(encode_bool(false).to_cbor()), "d87980");
        assert_eq!(hex::encode(encode_bool(true).to_cbor()), "d87a80");
    }

    #[test]
    fn test_attestation_threads_other_flag() {
        let datum = sample();
        let updated = datum.with_learner_attested();
        assert!(updated.learner_attested);
        assert!(updated.mentor_attested);
        assert!(updated.both_attested());
        assert_eq!(updated.receiver_key_hash, datum.receiver_key_hash);
    }

    #[test]
    fn test_session_bytes_match_uuid_hex() {
        let id = Uuid::parse_str("4f1c2b9e-8d7a-4c3b-9e2f-1a2b3c4d5e6f").unwrap();
        assert_eq!(
            hex::encode(session_id_bytes(&id)),
            "4f1c2b9e8d7a4c3b9e2f1a2b3c4d5e6f"
        );
        let datum = EscrowDatum::new([1; 28], [2; 28], 5, &id, [3; 28]);
        assert_eq!(datum.session_uuid(), id);
    }

    #[test]
    fn test_wrong_constructor_is_typed_error() {
        let data = PlutusData::constr(1, vec![]);
        assert_eq!(
            EscrowDatum::from_plutus_data(&data),
            Err(CodecError::UnknownConstructorIndex {
                context: "EscrowDatum",
                index: 1
            })
        );
    }

    #[test]
    fn test_malformed_fields() {
        let mut fields = match sample().to_plutus_data() {
            PlutusData::Constr { fields, .. } => fields,
            _ => unreachable!(),
        };
        fields[0] = PlutusData::Bytes(vec![0; 27]);
        let err = EscrowDatum::from_plutus_data(&PlutusData::constr(0, fields.clone()));
        assert!(matches!(err, Err(CodecError::MalformedDatum(_))));

        fields.pop();
        let err = EscrowDatum::from_plutus_data(&PlutusData::constr(0, fields));
        assert!(matches!(err, Err(CodecError::MalformedDatum(_))));

        let mut fields = match sample().to_plutus_data() {
            PlutusData::Constr { fields, .. } => fields,
            _ => unreachable!(),
        };
        fields[4] = PlutusData::unit_constr(2);
        let err = EscrowDatum::from_plutus_data(&PlutusData::constr(0, fields));
        assert!(matches!(
            err,
            Err(CodecError::UnknownConstructorIndex { context: "Bool", index: 2 })
        ));
    }

    #[test]
    fn test_negative_price_rejected() {
        let mut fields = match sample().to_plutus_data() {
            PlutusData::Constr { fields, .. } => fields,
            _ => unreachable!(),
        };
        fields[2] = PlutusData::Integer(-1);
        assert!(EscrowDatum::from_plutus_data(&PlutusData::constr(0, fields)).is_err());
    }

    #[test]
    fn test_redeemer_indices() {
        let expected = ["d87980", "d87a80", "d87b80", "d87c80"];
        for (redeemer, hex_form) in EscrowRedeemer::ALL.iter().zip(expected) {
            assert_eq!(hex::encode(redeemer.to_cbor()), hex_form);
            assert_eq!(EscrowRedeemer::from_cbor(&redeemer.to_cbor()).unwrap(), *redeemer);
        }
        assert!(matches!(
            EscrowRedeemer::from_index(4),
            Err(CodecError::UnknownConstructorIndex { index: 4, .. })
        ));
    }

    #[test]
    fn test_mint_redeemer() {
        let id = Uuid::new_v4();
        let redeemer = MintRedeemer::new(&id);
        let bytes = redeemer.to_cbor();
        assert_eq!(&hex::encode(&bytes)[..8], "d8799f50");
        assert_eq!(&bytes[4..20], id.as_bytes());
        assert_eq!(MintRedeemer::from_cbor(&bytes).unwrap(), redeemer);
    }

    #[test]
    fn test_datum_json_uses_hex() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["session_id"], "ab".repeat(16));
        let back: EscrowDatum = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample());
    }
}
