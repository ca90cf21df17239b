//! Plutus structured data
//!
//! Encoding follows the ledger's own serialisation of `Data`:
//! - constructors 0..=6 use tags 121..=127, 7..=127 use tags 1280..=1400,
//!   anything else the general form `102([index, fields])`
//! - non-empty lists (and constructor fields) are indefinite-length arrays,
//!   empty ones are `0x80`
//! - byte strings longer than 64 bytes are split into 64-byte chunks
//! - integers outside the 64-bit range use bignum tags

use super::cbor::{Decoder, Encoder, MAJOR_ARRAY, MAJOR_BYTES, MAJOR_MAP, MAJOR_NINT, MAJOR_TAG, MAJOR_UINT};
use super::CodecError;
use serde_json::json;

/// Maximum byte-string chunk the ledger accepts inside `Data`
pub const BYTES_CHUNK: usize = 64;

pub use super::cbor::MAX_DEPTH;

const COMPACT_TAG_BASE: u64 = 121;
const EXTENDED_TAG_BASE: u64 = 1280;
const GENERAL_CONSTR_TAG: u64 = 102;

/// A Plutus `Data` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlutusData {
    Constr { tag: u64, fields: Vec<PlutusData> },
    Map(Vec<(PlutusData, PlutusData)>),
    List(Vec<PlutusData>),
    Integer(i128),
    Bytes(Vec<u8>),
}

impl PlutusData {
    pub fn constr(tag: u64, fields: Vec<PlutusData>) -> Self {
        PlutusData::Constr { tag, fields }
    }

    /// Zero-field constructor
    pub fn unit_constr(tag: u64) -> Self {
        PlutusData::Constr {
            tag,
            fields: Vec::new(),
        }
    }

    pub fn as_constr(&self) -> Option<(u64, &[PlutusData])> {
        match self {
            PlutusData::Constr { tag, fields } => Some((*tag, fields.as_slice())),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PlutusData::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            PlutusData::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn to_cbor(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.into_bytes()
    }

    /// Decodes exactly one data item, rejecting trailing bytes
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(bytes);
        let data = Self::decode(&mut dec)?;
        dec.finish()?;
        Ok(data)
    }

    pub fn encode(&self, enc: &mut Encoder) {
        match self {
            PlutusData::Constr { tag, fields } => {
                if *tag <= 6 {
                    enc.tag(COMPACT_TAG_BASE + tag);
                    encode_list(enc, fields);
                } else if *tag <= 127 {
                    enc.tag(EXTENDED_TAG_BASE + tag - 7);
                    encode_list(enc, fields);
                } else {
                    enc.tag(GENERAL_CONSTR_TAG).array(2).uint(*tag);
                    encode_list(enc, fields);
                }
            }
            PlutusData::Map(entries) => {
                enc.map(entries.len() as u64);
                for (k, v) in entries {
                    k.encode(enc);
                    v.encode(enc);
                }
            }
            PlutusData::List(items) => encode_list(enc, items),
            PlutusData::Integer(i) => {
                enc.int(*i);
            }
            PlutusData::Bytes(b) => {
                if b.len() <= BYTES_CHUNK {
                    enc.bytes(b);
                } else {
                    enc.chunked_bytes(b, BYTES_CHUNK);
                }
            }
        }
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        decode_at(dec, 0)
    }

    /// The `{"constructor": n, "fields": [...]}` JSON form used by node
    /// tooling, handy for logging and the CLI
    pub fn to_detailed_json(&self) -> serde_json::Value {
        match self {
            PlutusData::Constr { tag, fields } => json!({
                "constructor": tag,
                "fields": fields.iter().map(|f| f.to_detailed_json()).collect::<Vec<_>>(),
            }),
            PlutusData::Map(entries) => json!({
                "map": entries
                    .iter()
                    .map(|(k, v)| json!({ "k": k.to_detailed_json(), "v": v.to_detailed_json() }))
                    .collect::<Vec<_>>(),
            }),
            PlutusData::List(items) => json!({
                "list": items.iter().map(|i| i.to_detailed_json()).collect::<Vec<_>>(),
            }),
            PlutusData::Integer(i) => match i64::try_from(*i) {
                Ok(small) => json!({ "int": small }),
                Err(_) => json!({ "int": i.to_string() }),
            },
            PlutusData::Bytes(b) => json!({ "bytes": hex::encode(b) }),
        }
    }
}

fn encode_list(enc: &mut Encoder, items: &[PlutusData]) {
    if items.is_empty() {
        enc.array(0);
        return;
    }
    enc.begin_array();
    for item in items {
        item.encode(enc);
    }
    enc.end();
}

fn decode_list(dec: &mut Decoder<'_>, depth: usize) -> Result<Vec<PlutusData>, CodecError> {
    let mut items = Vec::new();
    match dec.array()? {
        Some(len) => {
            for _ in 0..len {
                items.push(decode_at(dec, depth + 1)?);
            }
        }
        None => {
            while !dec.at_break()? {
                items.push(decode_at(dec, depth + 1)?);
            }
            dec.consume_break()?;
        }
    }
    Ok(items)
}

fn decode_at(dec: &mut Decoder<'_>, depth: usize) -> Result<PlutusData, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::NestingTooDeep(MAX_DEPTH));
    }

    match dec.peek_major()? {
        MAJOR_UINT | MAJOR_NINT => Ok(PlutusData::Integer(dec.int()?)),
        MAJOR_BYTES => Ok(PlutusData::Bytes(dec.bytes()?)),
        MAJOR_ARRAY => Ok(PlutusData::List(decode_list(dec, depth)?)),
        MAJOR_MAP => {
            let mut entries = Vec::new();
            match dec.map()? {
                Some(len) => {
                    for _ in 0..len {
                        let k = decode_at(dec, depth + 1)?;
                        let v = decode_at(dec, depth + 1)?;
                        entries.push((k, v));
                    }
                }
                None => {
                    while !dec.at_break()? {
                        let k = decode_at(dec, depth + 1)?;
                        let v = decode_at(dec, depth + 1)?;
                        entries.push((k, v));
                    }
                    dec.consume_break()?;
                }
            }
            Ok(PlutusData::Map(entries))
        }
        MAJOR_TAG => {
            let mut ahead = dec.clone();
            let tag = ahead.tag()?;
            match tag {
                2 | 3 => Ok(PlutusData::Integer(dec.int()?)),
                121..=127 => {
                    dec.tag()?;
                    let fields = decode_list(dec, depth)?;
                    Ok(PlutusData::Constr {
                        tag: tag - COMPACT_TAG_BASE,
                        fields,
                    })
                }
                1280..=1400 => {
                    dec.tag()?;
                    let fields = decode_list(dec, depth)?;
                    Ok(PlutusData::Constr {
                        tag: tag - EXTENDED_TAG_BASE + 7,
                        fields,
                    })
                }
                GENERAL_CONSTR_TAG => {
                    dec.tag()?;
                    if dec.array()? != Some(2) {
                        return Err(CodecError::Malformed(
                            "general constructor must be a 2-element array".to_string(),
                        ));
                    }
                    let index = dec.uint()?;
                    let fields = decode_list(dec, depth)?;
                    Ok(PlutusData::Constr { tag: index, fields })
                }
                other => Err(CodecError::Malformed(format!(
                    "tag {} is not valid inside plutus data",
                    other
                ))),
            }
        }
        _ => Err(CodecError::Malformed(
            "text strings and simple values are not plutus data".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_constructor_encoding() {
        assert_eq!(hex::encode(PlutusData::unit_constr(0).to_cbor()), "d87980");
        assert_eq!(hex::encode(PlutusData::unit_constr(1).to_cbor()), "d87a80");
        assert_eq!(hex::encode(PlutusData::unit_constr(3).to_cbor()), "d87c80");
    }

    #[test]
    fn test_fields_use_indefinite_list() {
        let data = PlutusData::constr(0, vec![PlutusData::Integer(5)]);
        assert_eq!(hex::encode(data.to_cbor()), "d8799f05ff");
    }

    #[test]
    fn test_extended_and_general_constructors() {
        let seven = PlutusData::unit_constr(7);
        assert_eq!(hex::encode(seven.to_cbor()), "d9050080");
        assert_eq!(PlutusData::from_cbor(&seven.to_cbor()).unwrap(), seven);

        let big = PlutusData::unit_constr(200);
        let bytes = big.to_cbor();
        assert_eq!(hex::encode(&bytes), "d866821818c880");
        assert_eq!(PlutusData::from_cbor(&bytes).unwrap(), big);
    }

    #[test]
    fn test_long_bytes_are_chunked() {
        let data = PlutusData::Bytes(vec![0xab; 100]);
        let bytes = data.to_cbor();
        assert_eq!(bytes[0], 0x5f);
        assert_eq!(PlutusData::from_cbor(&bytes).unwrap(), data);
    }

    #[test]
    fn test_map_and_nested_list() {
        let data = PlutusData::Map(vec![(
            PlutusData::Bytes(b"k".to_vec()),
            PlutusData::List(vec![PlutusData::Integer(-3), PlutusData::List(vec![])]),
        )]);
        assert_eq!(PlutusData::from_cbor(&data.to_cbor()).unwrap(), data);
    }

    #[test]
    fn test_rejects_text() {
        let mut enc = Encoder::new();
        enc.text("nope");
        assert!(PlutusData::from_cbor(&enc.into_bytes()).is_err());
    }

    #[test]
    fn test_depth_limit() {
        let mut bytes = vec![0x81; MAX_DEPTH + 2];
        bytes.push(0x00);
        assert!(matches!(
            PlutusData::from_cbor(&bytes),
            Err(CodecError::NestingTooDeep(_))
        ));
    }

    #[test]
    fn test_detailed_json() {
        let data = PlutusData::constr(1, vec![PlutusData::Bytes(vec![0x01])]);
        assert_eq!(
            data.to_detailed_json(),
            json!({"constructor": 1, "fields": [{"bytes": "01"}]})
        );
    }
}
