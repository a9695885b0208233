//! Minimal bencode codec for metainfo files.
//!
//! Dictionaries are kept in a `BTreeMap` keyed by raw bytes, which yields the
//! sorted key order the format requires on encode.

use std::collections::BTreeMap;

use thiserror::Error;

/// Bencoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `i<n>e`
    Int(i64),
    /// `<len>:<bytes>`
    Bytes(Vec<u8>),
    /// `l...e`
    List(Vec<Value>),
    /// `d...e`
    Dict(BTreeMap<Vec<u8>, Value>),
}

/// Malformed bencode input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BencodeError {
    /// Input ended inside a value.
    #[error("unexpected end of input")]
    UnexpectedEnd,
    /// A byte that cannot start or continue a value.
    #[error("unexpected byte at offset {offset}")]
    UnexpectedByte {
        /// Offset of the offending byte.
        offset: usize,
    },
    /// Integer or length digits are invalid.
    #[error("invalid number at offset {offset}")]
    InvalidNumber {
        /// Offset where the number starts.
        offset: usize,
    },
    /// Bytes remain after the top-level value.
    #[error("trailing data after value")]
    TrailingData,
}

impl Value {
    /// Byte-string value from UTF-8 text.
    #[must_use]
    pub fn text(value: &str) -> Self {
        Self::Bytes(value.as_bytes().to_vec())
    }

    /// Encode into a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Append the encoding of this value to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Int(value) => {
                out.push(b'i');
                out.extend_from_slice(value.to_string().as_bytes());
                out.push(b'e');
            }
            Self::Bytes(bytes) => encode_bytes(bytes, out),
            Self::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Self::Dict(entries) => {
                out.push(b'd');
                for (key, value) in entries {
                    encode_bytes(key, out);
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    /// Look up `key` in a dictionary value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Dict(entries) => entries.get(key.as_bytes()),
            _ => None,
        }
    }

    /// Integer payload.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Byte-string payload.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

/// Decode a complete bencoded document.
///
/// # Errors
///
/// Returns [`BencodeError`] when the input is malformed or has trailing bytes.
pub fn decode(input: &[u8]) -> Result<Value, BencodeError> {
    let mut parser = Parser { input, offset: 0 };
    let value = parser.value()?;
    if parser.offset == input.len() {
        Ok(value)
    } else {
        Err(BencodeError::TrailingData)
    }
}

struct Parser<'a> {
    input: &'a [u8],
    offset: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.input
            .get(self.offset)
            .copied()
            .ok_or(BencodeError::UnexpectedEnd)
    }

    fn value(&mut self) -> Result<Value, BencodeError> {
        match self.peek()? {
            b'i' => {
                self.offset += 1;
                let value = self.number(b'e')?;
                Ok(Value::Int(value))
            }
            b'l' => {
                self.offset += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value()?);
                }
                self.offset += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                self.offset += 1;
                let mut entries = BTreeMap::new();
                while self.peek()? != b'e' {
                    let key = self.bytes()?;
                    let value = self.value()?;
                    entries.insert(key, value);
                }
                self.offset += 1;
                Ok(Value::Dict(entries))
            }
            b'0'..=b'9' => self.bytes().map(Value::Bytes),
            _ => Err(BencodeError::UnexpectedByte {
                offset: self.offset,
            }),
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>, BencodeError> {
        let start = self.offset;
        let len = usize::try_from(self.number(b':')?)
            .map_err(|_| BencodeError::InvalidNumber { offset: start })?;
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or(BencodeError::UnexpectedEnd)?;
        let bytes = self.input[self.offset..end].to_vec();
        self.offset = end;
        Ok(bytes)
    }

    fn number(&mut self, terminator: u8) -> Result<i64, BencodeError> {
        let start = self.offset;
        let rest = &self.input[start..];
        let len = rest
            .iter()
            .position(|byte| *byte == terminator)
            .ok_or(BencodeError::UnexpectedEnd)?;
        let digits = std::str::from_utf8(&rest[..len])
            .map_err(|_| BencodeError::InvalidNumber { offset: start })?;
        let value = digits
            .parse::<i64>()
            .map_err(|_| BencodeError::InvalidNumber { offset: start })?;
        self.offset = start + len + 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionaries_encode_with_sorted_keys() {
        let mut entries = BTreeMap::new();
        entries.insert(b"zeta".to_vec(), Value::Int(-3));
        entries.insert(b"alpha".to_vec(), Value::text("spam"));
        entries.insert(
            b"list".to_vec(),
            Value::List(vec![Value::Int(1), Value::text("")]),
        );
        let encoded = Value::Dict(entries).to_bytes();
        assert_eq!(encoded, b"d5:alpha4:spam4:listli1e0:e4:zetai-3ee".to_vec());
    }

    #[test]
    fn decode_reverses_encode() -> Result<(), BencodeError> {
        let raw = b"d4:infod6:lengthi42e4:name3:abcee";
        let value = decode(raw)?;
        assert_eq!(
            value.get("info").and_then(|info| info.get("length")).and_then(Value::as_int),
            Some(42)
        );
        assert_eq!(value.to_bytes(), raw.to_vec());
        Ok(())
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert_eq!(decode(b"i12"), Err(BencodeError::UnexpectedEnd));
        assert_eq!(decode(b"5:ab"), Err(BencodeError::UnexpectedEnd));
        assert_eq!(decode(b"ixe"), Err(BencodeError::InvalidNumber { offset: 1 }));
        assert_eq!(decode(b"i1ei2e"), Err(BencodeError::TrailingData));
        assert_eq!(decode(b"x"), Err(BencodeError::UnexpectedByte { offset: 0 }));
    }
}
