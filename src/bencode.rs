//! # Bencode Codec
//!
//! This module implements the bencode serialization format used by torrent
//! files and tracker responses.
//!
//! ## Grammar
//!
//! Bencode knows four kinds of values, all self-delimiting:
//!
//! ```text
//! byte string   <decimal length>:<bytes>      4:spam
//! integer       i<decimal>e                   i-42e
//! list          l<value>*e                    l4:spami42ee
//! dictionary    d(<string key><value>)*e      d3:bar4:spam3:fooi42ee
//! ```
//!
//! Byte strings are raw bytes. Piece hashes and compact peer lists are not
//! UTF-8, so decoded strings are kept verbatim and any text interpretation
//! is left to the caller.
//!
//! ## Canonical form
//!
//! The encoder emits canonical bencode: dictionary keys in ascending byte
//! order, integers with no leading zeros and no `-0`. Torrent files are
//! canonical already, so `encode(decode(bytes)) == bytes` holds for them.

use std::collections::BTreeMap;

use thiserror::Error;

/// Decoding failures, each carrying the byte offset where it was detected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    /// Input ran out in the middle of a value.
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEnd(usize),
    /// A value was expected but the byte is not a digit, `i`, `l` or `d`.
    #[error("invalid value prefix at byte {0}")]
    InvalidPrefix(usize),
    /// Malformed integer: empty digits, `-0`, a leading zero or a missing `e`.
    #[error("invalid integer at byte {0}")]
    InvalidInteger(usize),
    /// Malformed string: missing `:` or declared length past the end of input.
    #[error("invalid string at byte {0}")]
    InvalidString(usize),
    /// Dictionary key that is not a byte string.
    #[error("dictionary key is not a string at byte {0}")]
    InvalidDictKey(usize),
    /// A complete value was decoded but input bytes remain.
    #[error("trailing data after value at byte {0}")]
    TrailingData(usize),
}

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Arbitrary bytes, not necessarily UTF-8.
    Bytes(Vec<u8>),
    /// Signed 64-bit integer.
    Integer(i64),
    /// Ordered sequence of values.
    List(Vec<Value>),
    /// String-keyed mapping. The map keeps keys in canonical emission order.
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Borrow the byte string content, if this is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Get the integer content, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow the dictionary entries, if this is a dictionary.
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Render the value as JSON for display.
    ///
    /// Byte strings are converted with lossy UTF-8, which is only meant for
    /// human consumption; round-tripping goes through [`encode`] instead.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bytes(bytes) => {
                serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
            Value::Integer(n) => serde_json::Value::from(*n),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Dict(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (String::from_utf8_lossy(key).into_owned(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Decode a complete value from `buf`.
///
/// The whole input must be consumed; leftover bytes are reported as
/// [`BencodeError::TrailingData`]. This is the entry point for metainfo
/// files and tracker response bodies.
pub fn decode(buf: &[u8]) -> Result<Value, BencodeError> {
    let (value, consumed) = decode_at(buf, 0)?;
    if consumed != buf.len() {
        return Err(BencodeError::TrailingData(consumed));
    }
    Ok(value)
}

/// Decode one leading value from `buf`, returning it together with the
/// number of bytes consumed. Trailing bytes are left untouched.
pub fn decode_prefix(buf: &[u8]) -> Result<(Value, usize), BencodeError> {
    decode_at(buf, 0)
}

/// Decode a single value starting at `offset`.
///
/// Returns the value and the offset immediately past it.
pub fn decode_at(buf: &[u8], offset: usize) -> Result<(Value, usize), BencodeError> {
    match buf.get(offset) {
        None => Err(BencodeError::UnexpectedEnd(offset)),
        Some(b'0'..=b'9') => {
            let (bytes, next) = decode_bytes(buf, offset)?;
            Ok((Value::Bytes(bytes), next))
        }
        Some(b'i') => decode_integer(buf, offset),
        Some(b'l') => decode_list(buf, offset),
        Some(b'd') => decode_dict(buf, offset),
        Some(_) => Err(BencodeError::InvalidPrefix(offset)),
    }
}

fn decode_bytes(buf: &[u8], offset: usize) -> Result<(Vec<u8>, usize), BencodeError> {
    let mut pos = offset;
    let mut length: usize = 0;

    while let Some(&byte) = buf.get(pos) {
        match byte {
            b'0'..=b'9' => {
                length = length
                    .checked_mul(10)
                    .and_then(|n| n.checked_add((byte - b'0') as usize))
                    .ok_or(BencodeError::InvalidString(offset))?;
                pos += 1;
            }
            b':' => {
                let start = pos + 1;
                let end = start
                    .checked_add(length)
                    .filter(|&end| end <= buf.len())
                    .ok_or(BencodeError::InvalidString(offset))?;
                return Ok((buf[start..end].to_vec(), end));
            }
            _ => return Err(BencodeError::InvalidString(offset)),
        }
    }

    Err(BencodeError::UnexpectedEnd(buf.len()))
}

fn decode_integer(buf: &[u8], offset: usize) -> Result<(Value, usize), BencodeError> {
    let mut pos = offset + 1;
    let negative = buf.get(pos) == Some(&b'-');
    if negative {
        pos += 1;
    }

    let digits_start = pos;
    let mut magnitude: i64 = 0;

    while let Some(&byte) = buf.get(pos) {
        match byte {
            b'0'..=b'9' => {
                magnitude = magnitude
                    .checked_mul(10)
                    .and_then(|n| n.checked_add((byte - b'0') as i64))
                    .ok_or(BencodeError::InvalidInteger(offset))?;
                pos += 1;
            }
            b'e' => {
                let digits = pos - digits_start;
                if digits == 0 {
                    return Err(BencodeError::InvalidInteger(offset));
                }
                // `0` is the only value allowed to start with a zero digit,
                // and it has no sign.
                if buf[digits_start] == b'0' && (digits > 1 || negative) {
                    return Err(BencodeError::InvalidInteger(offset));
                }
                let value = if negative { -magnitude } else { magnitude };
                return Ok((Value::Integer(value), pos + 1));
            }
            _ => return Err(BencodeError::InvalidInteger(offset)),
        }
    }

    Err(BencodeError::UnexpectedEnd(buf.len()))
}

fn decode_list(buf: &[u8], offset: usize) -> Result<(Value, usize), BencodeError> {
    let mut items = Vec::new();
    let mut pos = offset + 1;

    loop {
        match buf.get(pos) {
            None => return Err(BencodeError::UnexpectedEnd(buf.len())),
            Some(b'e') => return Ok((Value::List(items), pos + 1)),
            Some(_) => {
                let (item, next) = decode_at(buf, pos)?;
                items.push(item);
                pos = next;
            }
        }
    }
}

fn decode_dict(buf: &[u8], offset: usize) -> Result<(Value, usize), BencodeError> {
    let mut entries = BTreeMap::new();
    let mut pos = offset + 1;

    loop {
        match buf.get(pos) {
            None => return Err(BencodeError::UnexpectedEnd(buf.len())),
            Some(b'e') => return Ok((Value::Dict(entries), pos + 1)),
            Some(b'0'..=b'9') => {
                let (key, after_key) = decode_bytes(buf, pos)?;
                let (value, next) = decode_at(buf, after_key)?;
                entries.insert(key, value);
                pos = next;
            }
            Some(_) => return Err(BencodeError::InvalidDictKey(pos)),
        }
    }
}

/// Encode a value into its canonical byte representation.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Bytes(bytes) => {
            buf.extend_from_slice(bytes.len().to_string().as_bytes());
            buf.push(b':');
            buf.extend_from_slice(bytes);
        }
        Value::Integer(n) => {
            buf.push(b'i');
            buf.extend_from_slice(n.to_string().as_bytes());
            buf.push(b'e');
        }
        Value::List(items) => {
            buf.push(b'l');
            for item in items {
                encode_into(item, buf);
            }
            buf.push(b'e');
        }
        Value::Dict(entries) => {
            buf.push(b'd');
            // BTreeMap iterates keys in ascending byte order
            for (key, value) in entries {
                buf.extend_from_slice(key.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(key);
                encode_into(value, buf);
            }
            buf.push(b'e');
        }
    }
}
