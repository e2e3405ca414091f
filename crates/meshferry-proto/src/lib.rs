//! # Meshferry Proto
//!
//! Wire codec for the meshferry file-transfer protocol.
//!
//! This crate provides:
//! - Packet encoding and decoding (3-byte opcode dispatch)
//! - Exponential rate-code mapping for transmission pacing
//! - Truncated content hashing and file descriptors
//!
//! All multi-byte fields are big-endian (network byte order). Packets are
//! small enough for a single mesh-radio frame; anything larger is the
//! transfer layer's problem.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod packet;
pub mod rate;

pub use error::PacketError;
pub use hash::{FileDescriptor, FileHash};
pub use packet::Packet;
pub use rate::RateState;

/// Length of the opcode prefix on every packet
pub const OPCODE_LEN: usize = 3;

/// Maximum number of missing-chunk indices carried in one
/// retransmission request; longer lists are truncated on encode
pub const MAX_MISSING_INDICES: usize = 64;

/// Sentinel size meaning "file too large to send, deny before any chunk"
pub const SIZE_TOO_LARGE: u32 = u32::MAX;
