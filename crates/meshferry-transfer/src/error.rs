//! Error types for the transfer engine.
//!
//! Nothing here is fatal to the process: every failure is scoped to one
//! file transfer or one packet.

use meshferry_proto::PacketError;
use meshferry_store::StoreError;
use thiserror::Error;

/// Transfer-level errors
#[derive(Debug, Error)]
pub enum TransferError {
    /// Wire codec error (packet dropped, not retried)
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// File exceeds what the size field or chunk index can carry
    #[error("file too large to send: {name}")]
    FileTooLarge {
        /// Offending file name
        name: String,
    },

    /// Announce declared a nonzero size in zero chunks
    #[error("malformed announce: {size} bytes declared in zero chunks")]
    MalformedAnnounce {
        /// Declared file size
        size: u32,
    },

    /// Data chunk index outside the announced chunk count
    #[error("chunk index {index} out of range for {total} chunks")]
    ChunkOutOfRange {
        /// Received index
        index: u16,
        /// Announced chunk count
        total: u16,
    },

    /// Content store failure (including integrity errors)
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Outbound transport channel closed
    #[error("transport channel closed")]
    ChannelClosed,
}
