//! Exponential rate coding.
//!
//! One byte covers wait intervals from 100 seconds (code 0) down to a
//! couple hundred microseconds (code 255), trading definition for range
//! the same way a floating-point exponent does:
//!
//! ```text
//! wait = 0.95^code * 100   (seconds)
//! code = log(wait / 100) / log(0.95)
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Base of the exponential mapping
const RATE_BASE: f64 = 0.95;

/// Wait time at code 0, in seconds
const RATE_SCALE: f64 = 100.0;

/// Encode a wait time in seconds as a 1-byte rate code.
///
/// Clamped to [0, 255]; waits of 100 s and longer encode as 0, and
/// non-positive waits saturate to 255 (the fastest code).
#[must_use]
pub fn encode_wait(seconds: f64) -> u8 {
    if seconds <= 0.0 {
        return u8::MAX;
    }
    let code = (seconds / RATE_SCALE).ln() / RATE_BASE.ln();
    code.round().clamp(0.0, 255.0) as u8
}

/// Decode a 1-byte rate code back to a wait time in seconds.
///
/// Strictly decreasing in the code value.
#[must_use]
pub fn decode_code(code: u8) -> f64 {
    RATE_BASE.powi(i32::from(code)) * RATE_SCALE
}

/// Shared per-connection pacing state.
///
/// One value per connection, overwritten whenever a peer announces a
/// different code (speed update, file request, retransmission request)
/// or a local caller sets one. Two files transferred concurrently over
/// the same connection share this single rate; that coupling is part of
/// the protocol, not an oversight, and the value is deliberately not
/// tied to any transfer-scoped lock.
#[derive(Debug)]
pub struct RateState(AtomicU8);

impl RateState {
    /// Create pacing state from an initial rate code
    #[must_use]
    pub const fn new(code: u8) -> Self {
        Self(AtomicU8::new(code))
    }

    /// Create pacing state from an initial wait time
    #[must_use]
    pub fn from_wait(seconds: f64) -> Self {
        Self::new(encode_wait(seconds))
    }

    /// Last-set rate code
    pub fn code(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    /// Overwrite the rate code
    pub fn set_code(&self, code: u8) {
        self.0.store(code, Ordering::Relaxed);
    }

    /// Overwrite the rate from a wait time in seconds
    pub fn set_wait(&self, seconds: f64) {
        self.set_code(encode_wait(seconds));
    }

    /// Current wait interval
    pub fn wait(&self) -> Duration {
        Duration::from_secs_f64(decode_code(self.code()))
    }
}

impl Default for RateState {
    /// Starts at code 0: one send per 100 seconds, the conservative
    /// duty-cycle-friendly default
    fn default() -> Self {
        Self::new(0)
    }
}
