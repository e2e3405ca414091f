//! Error types for the wire codec.

use thiserror::Error;

/// Packet-level decode errors
///
/// A failed decode drops the packet; the codec itself never triggers a
/// retry. Recovery is the retransmission loop's job.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed prefix for this packet kind
    #[error("packet too short: expected at least {expected}, got {actual}")]
    Truncated {
        /// Minimum bytes required
        expected: usize,
        /// Bytes actually received
        actual: usize,
    },

    /// Name bytes are not valid UTF-8
    #[error("malformed packet: name is not valid UTF-8")]
    MalformedName(#[from] std::str::Utf8Error),

    /// Missing-index list has an odd byte count
    #[error("malformed packet: odd trailing byte in missing-index list")]
    MalformedIndexList,

    /// Opcode prefix does not name a known packet kind
    #[error("unknown opcode: {:?}", String::from_utf8_lossy(.0))]
    UnknownOpcode([u8; 3]),
}
