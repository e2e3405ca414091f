//! Transfer event notifications.
//!
//! The engine reports upward through a channel of these events; the
//! consumer (desktop window, dashboard, headless log) is external.

use meshferry_proto::{FileDescriptor, FileHash};

/// Notification emitted by the transfer engine
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A peer announced a file and a receive session was opened
    AnnounceReceived {
        /// Announced descriptor
        descriptor: FileDescriptor,
    },

    /// A peer announced a file carrying the "too large" sentinel;
    /// nothing was allocated
    AnnounceRejected {
        /// Content hash from the announce
        hash: FileHash,
        /// File name from the announce
        name: String,
    },

    /// A receive session stored a new chunk
    Progress {
        /// Content hash
        hash: FileHash,
        /// File name
        name: String,
        /// Chunks stored so far
        received: u16,
        /// Announced chunk count
        total: u16,
        /// Received fraction, 0-100
        percent: f64,
    },

    /// A receive session reassembled the whole file and committed it
    Completed {
        /// Content hash
        hash: FileHash,
        /// File name
        name: String,
        /// File size in bytes
        size: u32,
    },

    /// A session aborted: retry budget exhausted or cancelled
    Aborted {
        /// Content hash
        hash: FileHash,
        /// File name
        name: String,
    },

    /// A peer named itself on the mesh
    PeerSeen {
        /// Announced peer name
        name: String,
    },

    /// A peer signalled it has or finished receiving a file we sent
    PeerFinished {
        /// Content hash
        hash: FileHash,
    },
}
