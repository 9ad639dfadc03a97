//! Ordered name/value properties exchanged in INITIATE and READY.
//!
//! Each property is encoded as a 1-byte name length, the name, a 4-byte big-endian value length
//! and the value. Names are compared case-insensitively.

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

/// Longest allowed property name.
pub const MAX_NAME_LENGTH: usize = u8::MAX as usize;

/// Errors that can occur when adding a property.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("empty property name")]
    EmptyName,
    #[error("property name too long: {0} bytes")]
    NameTooLong(usize),
    #[error("invalid property name: {0}")]
    InvalidName(String),
    #[error("property value too long: {0} bytes")]
    ValueTooLong(usize),
}

/// An ordered list of properties.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    properties: Vec<(String, Bytes)>,
}

fn valid_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b'+')
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a property.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Result<(), Error> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(Error::NameTooLong(name.len()));
        }
        if !name.bytes().all(valid_name_byte) {
            return Err(Error::InvalidName(name));
        }
        if u32::try_from(value.len()).is_err() {
            return Err(Error::ValueTooLong(value.len()));
        }
        self.properties.push((name, value));
        Ok(())
    }

    /// Appends a property and returns `self`, for building metadata inline.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Result<Self, Error> {
        self.push(name, value)?;
        Ok(self)
    }

    /// Returns the value of the first property called `name`.
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.properties
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.properties.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Appends every property of `other`.
    pub fn extend(&mut self, other: Metadata) {
        self.properties.extend(other.properties);
    }

    /// Number of bytes [Metadata::write] produces.
    pub fn encode_size(&self) -> usize {
        self.properties
            .iter()
            .map(|(n, v)| 1 + n.len() + 4 + v.len())
            .sum()
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        for (name, value) in &self.properties {
            // Lengths are checked in push
            buf.put_u8(name.len() as u8);
            buf.put_slice(name.as_bytes());
            buf.put_u32(value.len() as u32);
            buf.put_slice(value);
        }
    }

    /// Decodes properties from all remaining bytes of `buf`.
    ///
    /// Returns `None` if any property is truncated or has an invalid name.
    pub fn decode(mut buf: impl Buf) -> Option<Self> {
        let mut metadata = Self::new();
        while buf.has_remaining() {
            let name_len = buf.get_u8() as usize;
            if name_len == 0 || buf.remaining() < name_len {
                return None;
            }
            let name = buf.copy_to_bytes(name_len);
            if !name.iter().all(|&b| valid_name_byte(b)) {
                return None;
            }
            if buf.remaining() < 4 {
                return None;
            }
            let value_len = buf.get_u32() as usize;
            if buf.remaining() < value_len {
                return None;
            }
            let value = buf.copy_to_bytes(value_len);

            // Valid name bytes are ASCII
            let name = String::from_utf8(name.to_vec()).ok()?;
            metadata.properties.push((name, value));
        }
        Some(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode(metadata: &Metadata) -> Bytes {
        let mut buf = BytesMut::with_capacity(metadata.encode_size());
        metadata.write(&mut buf);
        assert_eq!(buf.len(), metadata.encode_size());
        buf.freeze()
    }

    #[test]
    fn test_encode_layout() {
        let metadata = Metadata::new().with("Socket-Type", "DEALER").unwrap();
        let encoded = encode(&metadata);
        let mut expected = vec![11u8];
        expected.extend_from_slice(b"Socket-Type");
        expected.extend_from_slice(&[0, 0, 0, 6]);
        expected.extend_from_slice(b"DEALER");
        assert_eq!(encoded.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_decode_preserves_order() {
        let metadata = Metadata::new()
            .with("Socket-Type", "ROUTER")
            .unwrap()
            .with("Identity", Bytes::new())
            .unwrap()
            .with("X-Custom", vec![0u8, 1, 2])
            .unwrap();
        let decoded = Metadata::decode(encode(&metadata)).unwrap();
        assert_eq!(decoded, metadata);
        let names: Vec<_> = decoded.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["Socket-Type", "Identity", "X-Custom"]);
    }

    #[test]
    fn test_get_ignores_case() {
        let metadata = Metadata::new().with("Socket-Type", "DEALER").unwrap();
        assert_eq!(metadata.get("socket-type").unwrap().as_ref(), b"DEALER");
        assert!(metadata.get("Identity").is_none());
    }

    #[test]
    fn test_longest_name() {
        let name = "a".repeat(MAX_NAME_LENGTH);
        let metadata = Metadata::new().with(name.clone(), "v").unwrap();
        let decoded = Metadata::decode(encode(&metadata)).unwrap();
        assert_eq!(decoded.get(&name).unwrap().as_ref(), b"v");
    }

    #[test]
    fn test_invalid_names() {
        let mut metadata = Metadata::new();
        assert_eq!(metadata.push("", "v"), Err(Error::EmptyName));
        assert_eq!(
            metadata.push("a".repeat(256), "v"),
            Err(Error::NameTooLong(256))
        );
        assert_eq!(
            metadata.push("bad name", "v"),
            Err(Error::InvalidName("bad name".into()))
        );
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_decode_truncated() {
        let metadata = Metadata::new().with("Identity", "abcdef").unwrap();
        let encoded = encode(&metadata);
        for len in 1..encoded.len() {
            assert!(Metadata::decode(encoded.slice(..len)).is_none(), "len {len}");
        }
        assert!(Metadata::decode(Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn test_decode_invalid_name() {
        assert!(Metadata::decode(&[0u8, 0, 0, 0, 0][..]).is_none());
        assert!(Metadata::decode(&[1u8, b' ', 0, 0, 0, 0][..]).is_none());
    }
}
