//! Content identity: truncated digests and file descriptors.

use serde::{Deserialize, Serialize};

use crate::SIZE_TOO_LARGE;

/// 32-bit content identifier: a BLAKE3 digest truncated to 4 bytes.
///
/// Not collision-proof, but at mesh scale (a handful of peers, hundreds
/// of files) the collision probability is accepted as negligible. Dedup
/// always pairs the hash with the file size.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FileHash(u32);

impl FileHash {
    /// Hash file content down to the 4-byte wire identifier
    #[must_use]
    pub fn of(content: &[u8]) -> Self {
        let digest = blake3::hash(content);
        let b = digest.as_bytes();
        Self(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Wrap a raw 32-bit identifier (as decoded off the wire)
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw 32-bit value
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Big-endian wire bytes
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Parse from big-endian wire bytes
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl std::fmt::Display for FileHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// A sender's declaration of a file's identity, created when the file is
/// announced and immutable for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Content hash
    pub hash: FileHash,
    /// File size in bytes; [`SIZE_TOO_LARGE`](crate::SIZE_TOO_LARGE)
    /// means the file was rejected before any chunk was sent
    pub size: u32,
    /// Number of chunks the content splits into
    pub total_chunks: u16,
    /// File name, capped at the configured path length
    pub name: String,
}

impl FileDescriptor {
    /// Whether this descriptor carries the "too large, rejected" sentinel
    #[must_use]
    pub fn is_too_large(&self) -> bool {
        self.size == SIZE_TOO_LARGE
    }
}
