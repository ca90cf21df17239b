//! Minimal CBOR reader/writer
//!
//! Only the subset of RFC 8949 the ledger uses: unsigned/negative integers,
//! bignum tags 2/3, byte and text strings (definite and chunked), arrays,
//! maps, tags and the simple values `false`/`true`/`null`. Writers always
//! emit the shortest head encoding; canonical key ordering is the caller's
//! job.

use super::CodecError;

pub const MAJOR_UINT: u8 = 0;
pub const MAJOR_NINT: u8 = 1;
pub const MAJOR_BYTES: u8 = 2;
pub const MAJOR_TEXT: u8 = 3;
pub const MAJOR_ARRAY: u8 = 4;
pub const MAJOR_MAP: u8 = 5;
pub const MAJOR_TAG: u8 = 6;
pub const MAJOR_SIMPLE: u8 = 7;

/// Nesting bound for any recursive walk over decoded items
pub const MAX_DEPTH: usize = 64;

const INDEFINITE: u8 = 31;
const BREAK: u8 = 0xff;

/// Positive bignum tag
pub const TAG_POS_BIGNUM: u64 = 2;
/// Negative bignum tag
pub const TAG_NEG_BIGNUM: u64 = 3;
/// Embedded CBOR data item tag
pub const TAG_ENCODED_CBOR: u64 = 24;

fn major_name(major: u8) -> &'static str {
    match major {
        MAJOR_UINT => "unsigned integer",
        MAJOR_NINT => "negative integer",
        MAJOR_BYTES => "byte string",
        MAJOR_TEXT => "text string",
        MAJOR_ARRAY => "array",
        MAJOR_MAP => "map",
        MAJOR_TAG => "tag",
        _ => "simple value",
    }
}

// =============================================================================
// Encoder
// =============================================================================

/// Append-only CBOR writer
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn head(&mut self, major: u8, arg: u64) -> &mut Self {
        let m = major << 5;
        if arg < 24 {
            self.buf.push(m | arg as u8);
        } else if arg <= u8::MAX as u64 {
            self.buf.push(m | 24);
            self.buf.push(arg as u8);
        } else if arg <= u16::MAX as u64 {
            self.buf.push(m | 25);
            self.buf.extend_from_slice(&(arg as u16).to_be_bytes());
        } else if arg <= u32::MAX as u64 {
            self.buf.push(m | 26);
            self.buf.extend_from_slice(&(arg as u32).to_be_bytes());
        } else {
            self.buf.push(m | 27);
            self.buf.extend_from_slice(&arg.to_be_bytes());
        }
        self
    }

    pub fn uint(&mut self, value: u64) -> &mut Self {
        self.head(MAJOR_UINT, value)
    }

    /// Any integer, falling back to bignum tags outside the 64-bit range
    pub fn int(&mut self, value: i128) -> &mut Self {
        if value >= 0 {
            if value <= u64::MAX as i128 {
                return self.uint(value as u64);
            }
            let bytes = minimal_be_bytes(value as u128);
            self.tag(TAG_POS_BIGNUM).bytes(&bytes)
        } else {
            // CBOR negative integers carry -1 - n
            let magnitude = (-1 - value) as u128;
            if magnitude <= u64::MAX as u128 {
                return self.head(MAJOR_NINT, magnitude as u64);
            }
            let bytes = minimal_be_bytes(magnitude);
            self.tag(TAG_NEG_BIGNUM).bytes(&bytes)
        }
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.head(MAJOR_BYTES, data.len() as u64);
        self.buf.extend_from_slice(data);
        self
    }

    /// Byte string split into definite chunks of at most `chunk` bytes
    /// inside an indefinite-length wrapper
    pub fn chunked_bytes(&mut self, data: &[u8], chunk: usize) -> &mut Self {
        self.buf.push((MAJOR_BYTES << 5) | INDEFINITE);
        for piece in data.chunks(chunk.max(1)) {
            self.bytes(piece);
        }
        self.end()
    }

    pub fn text(&mut self, value: &str) -> &mut Self {
        self.head(MAJOR_TEXT, value.len() as u64);
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn array(&mut self, len: u64) -> &mut Self {
        self.head(MAJOR_ARRAY, len)
    }

    pub fn begin_array(&mut self) -> &mut Self {
        self.buf.push((MAJOR_ARRAY << 5) | INDEFINITE);
        self
    }

    pub fn map(&mut self, len: u64) -> &mut Self {
        self.head(MAJOR_MAP, len)
    }

    /// Terminates an indefinite-length item
    pub fn end(&mut self) -> &mut Self {
        self.buf.push(BREAK);
        self
    }

    pub fn tag(&mut self, tag: u64) -> &mut Self {
        self.head(MAJOR_TAG, tag)
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.buf.push(if value { 0xf5 } else { 0xf4 });
        self
    }

    pub fn null(&mut self) -> &mut Self {
        self.buf.push(0xf6);
        self
    }

    /// Splice an already-encoded data item
    pub fn raw(&mut self, encoded: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(encoded);
        self
    }
}

fn minimal_be_bytes(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}

// =============================================================================
// Decoder
// =============================================================================

/// Cursor over a CBOR byte slice
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Fails unless every input byte was consumed
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.pos != self.data.len() {
            return Err(CodecError::TrailingBytes(self.data.len() - self.pos));
        }
        Ok(())
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        let b = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    pub fn peek_major(&self) -> Result<u8, CodecError> {
        self.data
            .get(self.pos)
            .map(|b| b >> 5)
            .ok_or(CodecError::UnexpectedEof)
    }

    /// True if the next byte is the indefinite-length terminator
    pub fn at_break(&self) -> Result<bool, CodecError> {
        self.data
            .get(self.pos)
            .map(|b| *b == BREAK)
            .ok_or(CodecError::UnexpectedEof)
    }

    pub fn consume_break(&mut self) -> Result<(), CodecError> {
        match self.byte()? {
            BREAK => Ok(()),
            other => Err(CodecError::Malformed(format!(
                "expected break, found 0x{:02x}",
                other
            ))),
        }
    }

    /// Reads an item head: major type and argument (`None` = indefinite)
    fn head(&mut self) -> Result<(u8, Option<u64>), CodecError> {
        let initial = self.byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;
        let arg = match info {
            0..=23 => Some(info as u64),
            24 => Some(self.byte()? as u64),
            25 => {
                let b = self.take(2)?;
                Some(u16::from_be_bytes([b[0], b[1]]) as u64)
            }
            26 => {
                let b = self.take(4)?;
                Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64)
            }
            27 => {
                let b = self.take(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                Some(u64::from_be_bytes(arr))
            }
            INDEFINITE if matches!(major, MAJOR_BYTES | MAJOR_TEXT | MAJOR_ARRAY | MAJOR_MAP) => {
                None
            }
            _ => {
                return Err(CodecError::Malformed(format!(
                    "reserved additional info {} for {}",
                    info,
                    major_name(major)
                )))
            }
        };
        Ok((major, arg))
    }

    fn expect(&mut self, major: u8) -> Result<Option<u64>, CodecError> {
        let found = self.peek_major()?;
        if found != major {
            return Err(CodecError::UnexpectedType {
                expected: major_name(major),
                found: major_name(found),
            });
        }
        let (_, arg) = self.head()?;
        Ok(arg)
    }

    fn definite(&mut self, major: u8) -> Result<u64, CodecError> {
        self.expect(major)?.ok_or_else(|| {
            CodecError::Malformed(format!("indefinite {} not allowed here", major_name(major)))
        })
    }

    pub fn uint(&mut self) -> Result<u64, CodecError> {
        self.definite(MAJOR_UINT)
    }

    /// Any integer, including bignum-tagged ones that fit in 128 bits
    pub fn int(&mut self) -> Result<i128, CodecError> {
        match self.peek_major()? {
            MAJOR_UINT => Ok(self.uint()? as i128),
            MAJOR_NINT => {
                let n = self.definite(MAJOR_NINT)?;
                Ok(-1 - n as i128)
            }
            MAJOR_TAG => {
                let tag = self.tag()?;
                let bytes = self.bytes()?;
                let magnitude = bignum_to_u128(&bytes)?;
                match tag {
                    TAG_POS_BIGNUM => i128::try_from(magnitude)
                        .map_err(|_| CodecError::IntegerOverflow),
                    TAG_NEG_BIGNUM => i128::try_from(magnitude)
                        .map(|m| -1 - m)
                        .map_err(|_| CodecError::IntegerOverflow),
                    other => Err(CodecError::Malformed(format!(
                        "tag {} is not an integer tag",
                        other
                    ))),
                }
            }
            other => Err(CodecError::UnexpectedType {
                expected: "integer",
                found: major_name(other),
            }),
        }
    }

    /// A byte string, concatenating chunks of an indefinite one
    pub fn bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        match self.expect(MAJOR_BYTES)? {
            Some(len) => Ok(self.take(len as usize)?.to_vec()),
            None => {
                let mut out = Vec::new();
                while !self.at_break()? {
                    let len = self.definite(MAJOR_BYTES)?;
                    out.extend_from_slice(self.take(len as usize)?);
                }
                self.consume_break()?;
                Ok(out)
            }
        }
    }

    pub fn text(&mut self) -> Result<String, CodecError> {
        let len = self.definite(MAJOR_TEXT)?;
        let raw = self.take(len as usize)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| CodecError::Malformed(format!("invalid utf-8 text: {}", e)))
    }

    /// Array head; `None` means indefinite length (terminated by a break)
    pub fn array(&mut self) -> Result<Option<u64>, CodecError> {
        self.expect(MAJOR_ARRAY)
    }

    /// Map head; `None` means indefinite length (terminated by a break)
    pub fn map(&mut self) -> Result<Option<u64>, CodecError> {
        self.expect(MAJOR_MAP)
    }

    pub fn tag(&mut self) -> Result<u64, CodecError> {
        self.definite(MAJOR_TAG)
    }

    pub fn bool(&mut self) -> Result<bool, CodecError> {
        match self.byte()? {
            0xf4 => Ok(false),
            0xf5 => Ok(true),
            other => Err(CodecError::Malformed(format!(
                "expected boolean, found 0x{:02x}",
                other
            ))),
        }
    }

    /// Skips one complete data item
    pub fn skip(&mut self) -> Result<(), CodecError> {
        self.skip_nested(0)
    }

    fn skip_nested(&mut self, depth: usize) -> Result<(), CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::NestingTooDeep(MAX_DEPTH));
        }
        match self.peek_major()? {
            MAJOR_UINT | MAJOR_NINT => {
                self.head()?;
            }
            MAJOR_BYTES => {
                self.bytes()?;
            }
            MAJOR_TEXT => {
                self.text()?;
            }
            MAJOR_ARRAY => match self.array()? {
                Some(len) => {
                    for _ in 0..len {
                        self.skip_nested(depth + 1)?;
                    }
                }
                None => {
                    while !self.at_break()? {
                        self.skip_nested(depth + 1)?;
                    }
                    self.consume_break()?;
                }
            },
            MAJOR_MAP => match self.map()? {
                Some(len) => {
                    for _ in 0..len.saturating_mul(2) {
                        self.skip_nested(depth + 1)?;
                    }
                }
                None => {
                    while !self.at_break()? {
                        self.skip_nested(depth + 1)?;
                        self.skip_nested(depth + 1)?;
                    }
                    self.consume_break()?;
                }
            },
            MAJOR_TAG => {
                self.tag()?;
                self.skip_nested(depth + 1)?;
            }
            _ => {
                let b = self.byte()?;
                match b & 0x1f {
                    0..=23 => {}
                    24 => {
                        self.take(1)?;
                    }
                    25 => {
                        self.take(2)?;
                    }
                    26 => {
                        self.take(4)?;
                    }
                    27 => {
                        self.take(8)?;
                    }
                    _ => {
                        return Err(CodecError::Malformed(format!(
                            "unexpected simple value 0x{:02x}",
                            b
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// The raw encoding of the next complete data item
    pub fn raw_item(&mut self) -> Result<&'a [u8], CodecError> {
        let start = self.pos;
        self.skip()?;
        Ok(&self.data[start..self.pos])
    }
}

fn bignum_to_u128(bytes: &[u8]) -> Result<u128, CodecError> {
    let trimmed: &[u8] = match bytes.iter().position(|b| *b != 0) {
        Some(first) => &bytes[first..],
        None => &[],
    };
    if trimmed.len() > 16 {
        return Err(CodecError::IntegerOverflow);
    }
    Ok(trimmed
        .iter()
        .fold(0u128, |acc, b| (acc << 8) | *b as u128))
}
