//! Retry and timeout policy for selective retransmission.
//!
//! Reliability on a lossy, unordered transport with no default
//! acknowledgments: the receiver periodically names what it is missing,
//! the sender resends exactly that, and a bounded retry budget turns a
//! dead link into an abort instead of a hung session.

use std::time::{Duration, Instant};

use meshferry_proto::{FileHash, Packet};

/// What the timer sweep should do for one receive session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Inside the inactivity window; nothing to do
    Wait,
    /// Window expired; send a retransmission request
    Request,
    /// Retry budget exhausted; abort the session
    Abort,
}

/// Per-file retry state on the receive side.
///
/// Chunk arrivals reset both the inactivity window and the retry
/// counter; only consecutive silent windows count against the budget.
#[derive(Debug)]
pub struct RetransmissionCoordinator {
    timeout: Duration,
    limit: u32,
    retries: u32,
    last_activity: Instant,
}

impl RetransmissionCoordinator {
    /// Create retry state, starting its first inactivity window at `now`
    #[must_use]
    pub fn new(timeout: Duration, limit: u32, now: Instant) -> Self {
        Self {
            timeout,
            limit,
            retries: 0,
            last_activity: now,
        }
    }

    /// Record chunk progress: restart the window, clear the counter
    pub fn on_progress(&mut self, now: Instant) {
        self.last_activity = now;
        self.retries = 0;
    }

    /// Consecutive unanswered requests so far
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Evaluate the timer for this session.
    ///
    /// A `Request` decision consumes one retry and restarts the window;
    /// the caller builds and sends the request packet. `Abort` is
    /// returned once the budget is spent.
    pub fn poll(&mut self, now: Instant) -> RetryDecision {
        if now.duration_since(self.last_activity) < self.timeout {
            return RetryDecision::Wait;
        }
        if self.retries >= self.limit {
            return RetryDecision::Abort;
        }
        self.retries += 1;
        self.last_activity = now;
        RetryDecision::Request
    }
}

/// Sender side: wrap the requested chunk indices back into data-chunk
/// packets, skipping indices we cannot serve. Fire-and-forget; the
/// requester's own retry loop recovers anything lost again.
#[must_use]
pub fn resend_packets(hash: FileHash, chunks: &[Vec<u8>], missing: &[u16]) -> Vec<Packet> {
    missing
        .iter()
        .filter_map(|&index| {
            chunks.get(usize::from(index)).map(|chunk| Packet::DataChunk {
                hash,
                index,
                payload: chunk.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn quiet_link_escalates_to_abort() {
        let start = Instant::now();
        let mut retry = RetransmissionCoordinator::new(TIMEOUT, 3, start);

        assert_eq!(retry.poll(start + Duration::from_secs(1)), RetryDecision::Wait);

        let mut now = start;
        for expected_retry in 1..=3 {
            now += TIMEOUT;
            assert_eq!(retry.poll(now), RetryDecision::Request);
            assert_eq!(retry.retries(), expected_retry);
        }

        now += TIMEOUT;
        assert_eq!(retry.poll(now), RetryDecision::Abort);
        // Abort is sticky until the caller tears the session down
        assert_eq!(retry.poll(now + TIMEOUT), RetryDecision::Abort);
    }

    #[test]
    fn progress_resets_window_and_budget() {
        let start = Instant::now();
        let mut retry = RetransmissionCoordinator::new(TIMEOUT, 2, start);

        let mut now = start + TIMEOUT;
        assert_eq!(retry.poll(now), RetryDecision::Request);
        now += TIMEOUT;
        assert_eq!(retry.poll(now), RetryDecision::Request);

        retry.on_progress(now);
        assert_eq!(retry.retries(), 0);
        assert_eq!(retry.poll(now + Duration::from_secs(1)), RetryDecision::Wait);
        assert_eq!(retry.poll(now + TIMEOUT), RetryDecision::Request);
    }

    #[test]
    fn window_is_measured_from_the_creation_instant() {
        let start = Instant::now();
        let mut retry = RetransmissionCoordinator::new(TIMEOUT, 1, start);

        // Exactly one window after creation is already expiry; the
        // coordinator holds no clock of its own
        assert_eq!(retry.poll(start + TIMEOUT), RetryDecision::Request);
    }

    #[test]
    fn resend_covers_exactly_the_requested_indices() {
        let hash = FileHash::from_raw(7);
        let chunks = vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()];

        let packets = resend_packets(hash, &chunks, &[2, 0]);
        assert_eq!(packets.len(), 2);
        assert_eq!(
            packets[0],
            Packet::DataChunk {
                hash,
                index: 2,
                payload: b"cc".to_vec()
            }
        );

        // Unknown indices are skipped, not errors
        assert_eq!(resend_packets(hash, &chunks, &[9]).len(), 0);
    }
}
