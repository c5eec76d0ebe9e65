//! Unknown and illegal-data terminal packets
//!
//! Every decode is total: bytes that no decoder claims become an
//! [`UnknownPacket`], and bytes a decoder rejected become an
//! [`IllegalPacket`] that keeps the offending raw data and the failure
//! reason, so diagnostics never lose information.

use std::fmt;

/// Raw bytes for which no decoder was bound
///
/// Spans exactly the byte range it was handed; encoding it reproduces the
/// input unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UnknownPacket {
    raw: Vec<u8>,
}

impl UnknownPacket {
    /// Wrap a byte range untyped
    pub fn new(raw: &[u8]) -> Self {
        Self { raw: raw.to_vec() }
    }

    /// The wrapped bytes
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// True if the wrapped range is empty
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Encode back to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.raw.clone()
    }
}

impl fmt::Display for UnknownPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown [{} bytes: {}]", self.raw.len(), hex::encode(&self.raw))
    }
}

/// Bytes that failed to decode as their expected protocol
///
/// Produced at the factory boundary when a decoder rejects its input; the
/// raw bytes and the decode failure reason are both retained.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IllegalPacket {
    raw: Vec<u8>,
    reason: String,
}

impl IllegalPacket {
    /// Wrap rejected bytes together with the failure reason
    pub fn new(raw: &[u8], reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_vec(),
            reason: reason.into(),
        }
    }

    /// The offending bytes
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Why the decode failed
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// True if the wrapped range is empty
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Encode back to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.raw.clone()
    }
}

impl fmt::Display for IllegalPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Illegal [{}; {} bytes: {}]",
            self.reason,
            self.raw.len(),
            hex::encode(&self.raw)
        )
    }
}
