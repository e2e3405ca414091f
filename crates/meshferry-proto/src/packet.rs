//! Packet encoding and decoding for the meshferry wire protocol.
//!
//! Every packet is a 3-byte ASCII opcode followed by a type-specific
//! binary body. Bodies are small enough for a single mesh-radio frame;
//! payload lengths are implicit (the remainder of the buffer). All
//! multi-byte fields are big-endian.

use crate::error::PacketError;
use crate::hash::FileHash;
use crate::{MAX_MISSING_INDICES, OPCODE_LEN};

/// Data chunk: hash(4) + index(2) + payload(rest)
pub const OP_DATA_CHUNK: [u8; 3] = *b"FCD";
/// File announce: hash(4) + size(4) + total_chunks(2) + name(rest)
pub const OP_FILE_ANNOUNCE: [u8; 3] = *b"FCI";
/// File hash / end marker: hash(4)
pub const OP_FILE_HASH: [u8; 3] = *b"FCH";
/// File request with speed: hash(4) + size(4) + rate(1)
pub const OP_FILE_REQUEST: [u8; 3] = *b"FCR";
/// Retransmission request: hash(4) + rate(1) + percent(1) + indices(2n)
pub const OP_RETRANSMIT: [u8; 3] = *b"FCQ";
/// Speed update: rate(1)
pub const OP_SPEED_UPDATE: [u8; 3] = *b"NCR";
/// Peer announce: name(rest)
pub const OP_PEER_ANNOUNCE: [u8; 3] = *b"NCA";

/// A decoded protocol packet.
///
/// Closed set of wire kinds, produced by [`Packet::decode`] and consumed
/// once. Construct and [`Packet::encode`] to put one on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// One slice of a file's bytes
    DataChunk {
        /// Content hash of the whole file
        hash: FileHash,
        /// Chunk index, 0-based
        index: u16,
        /// Chunk bytes; length is whatever remained in the packet
        payload: Vec<u8>,
    },
    /// Declaration of a file's identity ahead of its chunks
    FileAnnounce {
        /// Content hash
        hash: FileHash,
        /// File size, or the all-ones "too large" sentinel
        size: u32,
        /// Authoritative chunk count for the session
        total_chunks: u16,
        /// File name (UTF-8)
        name: String,
    },
    /// Lightweight "I have / finished this file" marker
    FileHash {
        /// Content hash
        hash: FileHash,
    },
    /// Peer-announced pacing change
    SpeedUpdate {
        /// New rate code
        rate: u8,
    },
    /// Ask a peer to send a file it announced, at a given pace
    FileRequest {
        /// Content hash
        hash: FileHash,
        /// Expected size (dedup key together with the hash)
        size: u32,
        /// Requested rate code
        rate: u8,
    },
    /// Ask the sender to resend specific missing chunks
    RetransmitRequest {
        /// Content hash
        hash: FileHash,
        /// Requested rate code
        rate: u8,
        /// Fraction received, scaled to 0-255
        percent: u8,
        /// Missing chunk indices; at most
        /// [`MAX_MISSING_INDICES`](crate::MAX_MISSING_INDICES) survive
        /// encoding
        missing: Vec<u16>,
    },
    /// A peer naming itself on the mesh
    PeerAnnounce {
        /// Peer name (UTF-8, no length prefix)
        name: String,
    },
}

/// Scale a 0-100 percentage to the 1-byte wire field
#[must_use]
pub fn percent_to_wire(percent: f64) -> u8 {
    (percent / 100.0 * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Expand the 1-byte wire field back to a 0-100 percentage
#[must_use]
pub fn wire_to_percent(byte: u8) -> f64 {
    f64::from(byte) / 255.0 * 100.0
}

impl Packet {
    /// Opcode prefix for this packet kind
    #[must_use]
    pub fn opcode(&self) -> [u8; 3] {
        match self {
            Self::DataChunk { .. } => OP_DATA_CHUNK,
            Self::FileAnnounce { .. } => OP_FILE_ANNOUNCE,
            Self::FileHash { .. } => OP_FILE_HASH,
            Self::SpeedUpdate { .. } => OP_SPEED_UPDATE,
            Self::FileRequest { .. } => OP_FILE_REQUEST,
            Self::RetransmitRequest { .. } => OP_RETRANSMIT,
            Self::PeerAnnounce { .. } => OP_PEER_ANNOUNCE,
        }
    }

    /// Encode into wire bytes.
    ///
    /// Allocates exactly opcode + fixed header + payload. A missing-index
    /// list longer than the cap is silently truncated.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::DataChunk {
                hash,
                index,
                payload,
            } => {
                let mut buf = Vec::with_capacity(OPCODE_LEN + 6 + payload.len());
                buf.extend_from_slice(&OP_DATA_CHUNK);
                buf.extend_from_slice(&hash.to_be_bytes());
                buf.extend_from_slice(&index.to_be_bytes());
                buf.extend_from_slice(payload);
                buf
            }
            Self::FileAnnounce {
                hash,
                size,
                total_chunks,
                name,
            } => {
                let mut buf = Vec::with_capacity(OPCODE_LEN + 10 + name.len());
                buf.extend_from_slice(&OP_FILE_ANNOUNCE);
                buf.extend_from_slice(&hash.to_be_bytes());
                buf.extend_from_slice(&size.to_be_bytes());
                buf.extend_from_slice(&total_chunks.to_be_bytes());
                buf.extend_from_slice(name.as_bytes());
                buf
            }
            Self::FileHash { hash } => {
                let mut buf = Vec::with_capacity(OPCODE_LEN + 4);
                buf.extend_from_slice(&OP_FILE_HASH);
                buf.extend_from_slice(&hash.to_be_bytes());
                buf
            }
            Self::SpeedUpdate { rate } => {
                let mut buf = Vec::with_capacity(OPCODE_LEN + 1);
                buf.extend_from_slice(&OP_SPEED_UPDATE);
                buf.push(*rate);
                buf
            }
            Self::FileRequest { hash, size, rate } => {
                let mut buf = Vec::with_capacity(OPCODE_LEN + 9);
                buf.extend_from_slice(&OP_FILE_REQUEST);
                buf.extend_from_slice(&hash.to_be_bytes());
                buf.extend_from_slice(&size.to_be_bytes());
                buf.push(*rate);
                buf
            }
            Self::RetransmitRequest {
                hash,
                rate,
                percent,
                missing,
            } => {
                let count = missing.len().min(MAX_MISSING_INDICES);
                let mut buf = Vec::with_capacity(OPCODE_LEN + 6 + count * 2);
                buf.extend_from_slice(&OP_RETRANSMIT);
                buf.extend_from_slice(&hash.to_be_bytes());
                buf.push(*rate);
                buf.push(*percent);
                for index in &missing[..count] {
                    buf.extend_from_slice(&index.to_be_bytes());
                }
                buf
            }
            Self::PeerAnnounce { name } => {
                let mut buf = Vec::with_capacity(OPCODE_LEN + name.len());
                buf.extend_from_slice(&OP_PEER_ANNOUNCE);
                buf.extend_from_slice(name.as_bytes());
                buf
            }
        }
    }

    /// Decode a packet from wire bytes.
    ///
    /// # Errors
    ///
    /// [`PacketError::Truncated`] when the buffer is shorter than the
    /// fixed prefix for its kind, [`PacketError::MalformedName`] /
    /// [`PacketError::MalformedIndexList`] for invalid variable parts,
    /// [`PacketError::UnknownOpcode`] for an unrecognized prefix.
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        let (opcode, body) = split_fixed::<3>(data, 0)?;

        match opcode {
            OP_DATA_CHUNK => {
                let (hash, rest) = split_fixed::<4>(body, OPCODE_LEN)?;
                let (index, payload) = split_fixed::<2>(rest, OPCODE_LEN + 4)?;
                Ok(Self::DataChunk {
                    hash: FileHash::from_be_bytes(hash),
                    index: u16::from_be_bytes(index),
                    payload: payload.to_vec(),
                })
            }
            OP_FILE_ANNOUNCE => {
                let (hash, rest) = split_fixed::<4>(body, OPCODE_LEN)?;
                let (size, rest) = split_fixed::<4>(rest, OPCODE_LEN + 4)?;
                let (total_chunks, name) = split_fixed::<2>(rest, OPCODE_LEN + 8)?;
                Ok(Self::FileAnnounce {
                    hash: FileHash::from_be_bytes(hash),
                    size: u32::from_be_bytes(size),
                    total_chunks: u16::from_be_bytes(total_chunks),
                    name: std::str::from_utf8(name)?.to_owned(),
                })
            }
            OP_FILE_HASH => {
                let (hash, _) = split_fixed::<4>(body, OPCODE_LEN)?;
                Ok(Self::FileHash {
                    hash: FileHash::from_be_bytes(hash),
                })
            }
            OP_SPEED_UPDATE => {
                let (rate, _) = split_fixed::<1>(body, OPCODE_LEN)?;
                Ok(Self::SpeedUpdate { rate: rate[0] })
            }
            OP_FILE_REQUEST => {
                let (hash, rest) = split_fixed::<4>(body, OPCODE_LEN)?;
                let (size, rest) = split_fixed::<4>(rest, OPCODE_LEN + 4)?;
                let (rate, _) = split_fixed::<1>(rest, OPCODE_LEN + 8)?;
                Ok(Self::FileRequest {
                    hash: FileHash::from_be_bytes(hash),
                    size: u32::from_be_bytes(size),
                    rate: rate[0],
                })
            }
            OP_RETRANSMIT => {
                let (hash, rest) = split_fixed::<4>(body, OPCODE_LEN)?;
                let (rate, rest) = split_fixed::<1>(rest, OPCODE_LEN + 4)?;
                let (percent, indices) = split_fixed::<1>(rest, OPCODE_LEN + 5)?;
                if indices.len() % 2 != 0 {
                    return Err(PacketError::MalformedIndexList);
                }
                let missing = indices
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Ok(Self::RetransmitRequest {
                    hash: FileHash::from_be_bytes(hash),
                    rate: rate[0],
                    percent: percent[0],
                    missing,
                })
            }
            OP_PEER_ANNOUNCE => Ok(Self::PeerAnnounce {
                name: std::str::from_utf8(body)?.to_owned(),
            }),
            other => Err(PacketError::UnknownOpcode(other)),
        }
    }
}

/// Split `N` fixed bytes off the front of `data`, reporting the absolute
/// offset already consumed for a useful truncation error.
fn split_fixed<const N: usize>(
    data: &[u8],
    consumed: usize,
) -> Result<([u8; N], &[u8]), PacketError> {
    if data.len() < N {
        return Err(PacketError::Truncated {
            expected: consumed + N,
            actual: consumed + data.len(),
        });
    }
    let (head, rest) = data.split_at(N);
    let mut fixed = [0u8; N];
    fixed.copy_from_slice(head);
    Ok((fixed, rest))
}
