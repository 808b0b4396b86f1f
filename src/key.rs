//! Partition and clustering keys in their composite wire form.
//!
//! Both key kinds are opaque ordered tuples of raw component buffers. The
//! wire form (and the `"raw"` field of the structured dump) is the composite
//! encoding: per component a u16 big-endian length followed by the bytes.
//! Clustering keys may be a strict prefix of the full clustering (range
//! tombstone bounds).

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// Raised when a composite blob does not decode into components.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyDecodeError {
    /// A component length field points past the end of the buffer.
    #[error("truncated composite key component")]
    Truncated,
    /// The input hex string is not valid hex.
    #[error("invalid hex digit in key")]
    BadHex,
}

fn encode_components(components: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(components.iter().map(|c| c.len() + 2).sum());
    for c in components {
        out.extend_from_slice(&(c.len() as u16).to_be_bytes());
        out.extend_from_slice(c);
    }
    out
}

fn decode_components(mut raw: &[u8]) -> Result<Vec<Vec<u8>>, KeyDecodeError> {
    let mut components = Vec::new();
    while !raw.is_empty() {
        if raw.len() < 2 {
            return Err(KeyDecodeError::Truncated);
        }
        let len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        raw = &raw[2..];
        if raw.len() < len {
            return Err(KeyDecodeError::Truncated);
        }
        components.push(raw[..len].to_vec());
        raw = &raw[len..];
    }
    Ok(components)
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Render bytes as lowercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX_DIGITS[(b >> 4) as usize] as char);
        out.push(HEX_DIGITS[(b & 0xf) as usize] as char);
    }
    out
}

/// Parse a hex string into bytes. Accepts upper and lower case.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, KeyDecodeError> {
    if hex.len() % 2 != 0 {
        return Err(KeyDecodeError::BadHex);
    }
    let digits = hex.as_bytes();
    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in digits.chunks_exact(2) {
        let hi = (pair[0] as char).to_digit(16).ok_or(KeyDecodeError::BadHex)?;
        let lo = (pair[1] as char).to_digit(16).ok_or(KeyDecodeError::BadHex)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Ok(out)
}

/// A partition key: the full tuple of partition-key component values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    components: Vec<Vec<u8>>,
}

impl PartitionKey {
    /// Build a key from its component values.
    pub fn from_components(components: Vec<Vec<u8>>) -> Self {
        Self { components }
    }

    /// Decode the composite wire form.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, KeyDecodeError> {
        Ok(Self {
            components: decode_components(raw)?,
        })
    }

    /// Encode into the composite wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_components(&self.components)
    }

    /// Component values, in declaration order.
    pub fn components(&self) -> &[Vec<u8>] {
        &self.components
    }
}

/// A clustering key, possibly a strict prefix of the full clustering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusteringKey {
    components: Vec<Vec<u8>>,
}

impl ClusteringKey {
    /// The empty clustering prefix.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a key from its component values.
    pub fn from_components(components: Vec<Vec<u8>>) -> Self {
        Self { components }
    }

    /// Decode the composite wire form.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, KeyDecodeError> {
        Ok(Self {
            components: decode_components(raw)?,
        })
    }

    /// Encode into the composite wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_components(&self.components)
    }

    /// Component values, in declaration order.
    pub fn components(&self) -> &[Vec<u8>] {
        &self.components
    }

    /// True when no component is present.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// A partition key decorated with its token.
///
/// Partitions order by `(token, key bytes)`; the token is derived from the
/// composite form by the schema's partitioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratedKey {
    /// The 64-bit token.
    pub token: i64,
    /// The partition key proper.
    pub key: PartitionKey,
}

impl DecoratedKey {
    /// Compare two decorated keys by `(token, key bytes)`.
    pub fn tri_compare(&self, other: &DecoratedKey) -> Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.key.to_bytes().cmp(&other.key.to_bytes()))
    }
}

impl fmt::Display for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{key: {}, token: {}}}", bytes_to_hex(&self.key.to_bytes()), self.token)
    }
}
