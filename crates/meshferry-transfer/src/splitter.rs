//! Outbound file splitting.

use std::path::Path;

use meshferry_proto::{FileDescriptor, FileHash, SIZE_TOO_LARGE};

use crate::TransferConfig;

/// Cuts file content into radio-sized chunks and computes the
/// descriptor a sender announces ahead of them.
#[derive(Debug, Clone)]
pub struct FileSplitter {
    chunk_size: usize,
    path_length: usize,
}

impl FileSplitter {
    /// Create a splitter with explicit chunk size and path-length cap
    #[must_use]
    pub fn new(chunk_size: usize, path_length: usize) -> Self {
        debug_assert!(chunk_size > 0);
        Self {
            chunk_size,
            path_length,
        }
    }

    /// Create a splitter from the engine configuration
    #[must_use]
    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(config.chunk_size, config.path_length)
    }

    /// Chunk size in bytes
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks `len` bytes split into
    #[must_use]
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size)
    }

    /// Cut content into chunks; every chunk is full-size except possibly
    /// the last
    #[must_use]
    pub fn split(&self, content: &[u8]) -> Vec<Vec<u8>> {
        content
            .chunks(self.chunk_size)
            .map(<[u8]>::to_vec)
            .collect()
    }

    /// Compute the announce descriptor for a named piece of content.
    ///
    /// Files whose size does not fit the 4-byte field, or whose chunk
    /// count overflows the 2-byte index, get the "too large" sentinel:
    /// the peer denies them before any chunk moves.
    #[must_use]
    pub fn describe(&self, name: &str, content: &[u8]) -> FileDescriptor {
        let hash = FileHash::of(content);
        let chunks = self.chunk_count(content.len());
        let too_large =
            content.len() >= SIZE_TOO_LARGE as usize || chunks > usize::from(u16::MAX);

        let (size, total_chunks) = if too_large {
            (SIZE_TOO_LARGE, 0)
        } else {
            (content.len() as u32, chunks as u16)
        };

        FileDescriptor {
            hash,
            size,
            total_chunks,
            name: self.shorten_name(name),
        }
    }

    /// Shorten an over-long name to the path-length cap, keeping the
    /// directory part and the extension and truncating the stem.
    #[must_use]
    pub fn shorten_name(&self, name: &str) -> String {
        if name.len() <= self.path_length {
            return name.to_owned();
        }

        let path = Path::new(name);
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| format!("{}/", p.to_string_lossy()))
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let budget = self.path_length.saturating_sub(dir.len() + ext.len());
        if budget == 0 {
            // Directory and extension alone blow the cap; keep the tail
            // of nothing and hard-truncate the whole name instead
            tracing::warn!(name, cap = self.path_length, "path shortening failed");
            return truncate_on_char_boundary(name, self.path_length).to_owned();
        }

        format!("{dir}{}{ext}", truncate_on_char_boundary(&stem, budget))
    }
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
