//! Transfer configuration

use std::time::Duration;

use crate::DEFAULT_CHUNK_SIZE;

/// Transfer engine configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size in bytes
    pub chunk_size: usize,

    /// Maximum file-name length carried in announces; longer names are
    /// shortened preserving directory and extension
    pub path_length: usize,

    /// Inactivity window before a receive session asks for its missing
    /// chunks again
    pub inactivity_timeout: Duration,

    /// Consecutive unanswered retransmission requests before a receive
    /// session aborts
    pub retransmit_limit: u32,

    /// Maximum chunks parked per file that arrive ahead of their
    /// announce
    pub orphan_limit: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            path_length: 64,
            inactivity_timeout: Duration::from_secs(10),
            retransmit_limit: 3,
            orphan_limit: 64,
        }
    }
}
