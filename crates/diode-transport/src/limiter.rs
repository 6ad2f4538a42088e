//! # Rate Limiter
//!
//! Simple averaging limiter: counters accumulate per send, and every
//! [`CHK_PERIOD`] packets the emit thread sleeps in short increments
//! while the observed rate over the current window exceeds the target,
//! then the window resets. Short-term bursts of up to one check period
//! pass through unshaped.

use quanta::Instant;
use std::time::Duration;

/// Packets between rate checks.
const CHK_PERIOD: u64 = 1000;

/// Sleep increment while over the target rate.
const SLEEP_PERIOD: Duration = Duration::from_micros(100);

/// Byte-rate cap for the sending path. A rate of zero disables shaping.
pub struct RateLimiter {
    byterate: f64,
    n_pkt_sent: u64,
    n_bytes_sent: u64,
    since: Instant,
    total_bytes: u64,
}

impl RateLimiter {
    pub fn new(byterate: f64) -> Self {
        RateLimiter {
            byterate,
            n_pkt_sent: 0,
            n_bytes_sent: 0,
            since: Instant::now(),
            total_bytes: 0,
        }
    }

    /// Account for `len` sent bytes, throttling if the window rate is
    /// above target.
    pub fn limit(&mut self, len: usize) {
        self.total_bytes += len as u64;
        self.n_pkt_sent += 1;
        self.n_bytes_sent += len as u64;
        if self.byterate > 0.0 && self.n_pkt_sent > CHK_PERIOD {
            while self.current_rate() > self.byterate {
                std::thread::sleep(SLEEP_PERIOD);
            }
            self.reset_window();
        }
    }

    /// Total bytes accounted over the limiter's lifetime.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn current_rate(&self) -> f64 {
        let elapsed = self.since.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.n_bytes_sent as f64 / elapsed
        }
    }

    fn reset_window(&mut self) {
        self.since = Instant::now();
        self.n_pkt_sent = 0;
        self.n_bytes_sent = 0;
    }

    #[cfg(test)]
    fn window_packets(&self) -> u64 {
        self.n_pkt_sent
    }
}
