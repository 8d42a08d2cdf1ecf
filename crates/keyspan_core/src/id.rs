use std::borrow::Borrow;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Immutable byte identifier for tables, adapters, fields and row-key parts.
///
/// Ordering is unsigned byte-lexicographic with shorter prefixes first, which
/// is the comparator every ordered backend in this workspace sorts rows by.
/// Cloning is cheap: the bytes are reference counted.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteId(Bytes);

impl ByteId {
    pub const fn empty() -> Self {
        Self(Bytes::new())
    }

    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    /// Decodes the identifier as UTF-8, replacing invalid sequences.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// Returns a new identifier made of `self` followed by `suffix`.
    pub fn concat(&self, suffix: &[u8]) -> ByteId {
        let mut out = BytesMut::with_capacity(self.0.len() + suffix.len());
        out.put_slice(&self.0);
        out.put_slice(suffix);
        ByteId(out.freeze())
    }

    /// Smallest identifier greater than every identifier prefixed by `self`.
    pub fn next_prefix(&self) -> Option<ByteId> {
        next_prefix(&self.0).map(ByteId::from)
    }
}

/// Increments the last byte that is not `0xFF` and truncates after it.
///
/// Returns `None` when no such byte exists (empty or all-`0xFF` input); the
/// prefix then has no finite upper bound and callers must treat the stop
/// position as unbounded.
pub fn next_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let idx = prefix.iter().rposition(|b| *b != 0xFF)?;
    let mut out = prefix[..=idx].to_vec();
    out[idx] += 1;
    Some(out)
}

impl From<Vec<u8>> for ByteId {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&[u8]> for ByteId {
    fn from(value: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<[u8; N]> for ByteId {
    fn from(value: [u8; N]) -> Self {
        Self(Bytes::copy_from_slice(&value))
    }
}

impl From<&str> for ByteId {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for ByteId {
    fn from(value: String) -> Self {
        Self(Bytes::from(value.into_bytes()))
    }
}

impl From<Bytes> for ByteId {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for ByteId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for ByteId {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ByteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) if text.chars().all(|c| !c.is_control()) => write!(f, "ByteId({text:?})"),
            _ => write!(f, "ByteId(0x{})", hex::encode(&self.0)),
        }
    }
}

impl fmt::Display for ByteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl Serialize for ByteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ByteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw.as_str())
            .map(ByteId::from)
            .map_err(|err| D::Error::custom(format!("invalid hex id '{raw}': {err}")))
    }
}
