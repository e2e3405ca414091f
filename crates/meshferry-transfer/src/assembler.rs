//! Receive-side chunk reassembly.

use meshferry_proto::{FileDescriptor, MAX_MISSING_INDICES};

use crate::error::TransferError;

/// Receive session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    /// Descriptor known, no chunks yet
    Announced,
    /// At least one chunk present, not all
    Receiving,
    /// All chunks present, content handed off
    Complete,
    /// Retry budget exhausted or explicit cancel
    Aborted,
}

/// What storing one chunk did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// New chunk stored
    Stored,
    /// Slot already filled (or session finished); no state change
    Duplicate,
    /// This chunk filled the last empty slot
    Completed,
}

/// Ordered chunk slots for one announced file.
///
/// The slot count is fixed at creation from the announce's chunk count
/// and never changes. Storing is idempotent per index; the whole-file
/// content is produced once, in index order, when the last slot fills.
#[derive(Debug)]
pub struct ChunkAssembler {
    descriptor: FileDescriptor,
    slots: Vec<Option<Vec<u8>>>,
    filled: usize,
    state: AssemblyState,
    taken: bool,
}

impl ChunkAssembler {
    /// Open a receive session for an announced file.
    ///
    /// # Errors
    ///
    /// [`TransferError::FileTooLarge`] when the descriptor carries the
    /// size sentinel; no slot buffer is allocated in that case.
    /// [`TransferError::MalformedAnnounce`] when the descriptor declares
    /// a nonzero size in zero chunks, which could otherwise commit an
    /// empty blob under a size it does not have.
    pub fn new(descriptor: FileDescriptor) -> Result<Self, TransferError> {
        if descriptor.is_too_large() {
            return Err(TransferError::FileTooLarge {
                name: descriptor.name,
            });
        }
        if descriptor.total_chunks == 0 && descriptor.size > 0 {
            return Err(TransferError::MalformedAnnounce {
                size: descriptor.size,
            });
        }

        let total = usize::from(descriptor.total_chunks);
        let state = if total == 0 {
            // Zero-byte files have nothing to wait for
            AssemblyState::Complete
        } else {
            AssemblyState::Announced
        };

        Ok(Self {
            descriptor,
            slots: vec![None; total],
            filled: 0,
            state,
            taken: false,
        })
    }

    /// The announced descriptor
    #[must_use]
    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Store a chunk payload at its index.
    ///
    /// Duplicate fills are no-ops. After the last slot fills the session
    /// is [`AssemblyState::Complete`] and further chunks are duplicates.
    ///
    /// # Errors
    ///
    /// [`TransferError::ChunkOutOfRange`] when the index falls outside
    /// the announced count.
    pub fn store(&mut self, index: u16, payload: &[u8]) -> Result<ChunkOutcome, TransferError> {
        if matches!(self.state, AssemblyState::Complete | AssemblyState::Aborted) {
            return Ok(ChunkOutcome::Duplicate);
        }

        let slot = usize::from(index);
        if slot >= self.slots.len() {
            return Err(TransferError::ChunkOutOfRange {
                index,
                total: self.descriptor.total_chunks,
            });
        }

        if self.slots[slot].is_some() {
            return Ok(ChunkOutcome::Duplicate);
        }

        self.slots[slot] = Some(payload.to_vec());
        self.filled += 1;

        if self.filled == self.slots.len() {
            self.state = AssemblyState::Complete;
            Ok(ChunkOutcome::Completed)
        } else {
            self.state = AssemblyState::Receiving;
            Ok(ChunkOutcome::Stored)
        }
    }

    /// Whether all slots are filled
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == AssemblyState::Complete
    }

    /// Chunks stored so far
    #[must_use]
    pub fn received(&self) -> u16 {
        self.filled as u16
    }

    /// Indices still absent, in order
    #[must_use]
    pub fn missing(&self) -> Vec<u16> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i as u16)
            .collect()
    }

    /// Missing indices truncated to what one retransmission request
    /// carries
    #[must_use]
    pub fn missing_capped(&self) -> Vec<u16> {
        let mut missing = self.missing();
        missing.truncate(MAX_MISSING_INDICES);
        missing
    }

    /// Received fraction, 0-100
    #[must_use]
    pub fn percent_received(&self) -> f64 {
        if self.slots.is_empty() {
            return 100.0;
        }
        self.filled as f64 / self.slots.len() as f64 * 100.0
    }

    /// Take the reassembled content, once, after completion.
    ///
    /// Concatenates in index order and releases the slots. Returns
    /// `None` unless the session is complete, or if the content was
    /// already taken.
    #[must_use]
    pub fn take_content(&mut self) -> Option<Vec<u8>> {
        if self.state != AssemblyState::Complete || self.taken {
            return None;
        }
        self.taken = true;

        let len: usize = self.slots.iter().flatten().map(Vec::len).sum();
        let mut content = Vec::with_capacity(len);
        for slot in self.slots.drain(..) {
            if let Some(chunk) = slot {
                content.extend_from_slice(&chunk);
            }
        }
        Some(content)
    }

    /// Abort the session and release the slot buffer. No partial
    /// content survives.
    pub fn abort(&mut self) {
        self.state = AssemblyState::Aborted;
        self.slots.clear();
        self.filled = 0;
    }
}
