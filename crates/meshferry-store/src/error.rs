//! Error types for the content store.

use meshferry_proto::FileHash;
use thiserror::Error;

/// Content store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Index (de)serialization failure
    #[error("store index serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row claims cached content but the blob file is gone.
    ///
    /// This is a data-integrity failure, never folded into "not found".
    #[error("integrity error: row for {hash} ({path}) claims content but the blob is missing")]
    MissingBlob {
        /// Content hash of the damaged row
        hash: FileHash,
        /// Stored path of the damaged row
        path: String,
    },
}
