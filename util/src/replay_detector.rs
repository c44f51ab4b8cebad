/// Tracks which sequence numbers within one epoch have already been seen,
/// rejecting duplicates and anything too far behind the high-water mark.
/// Mirrors `webrtc_util::replay_detector::SlidingWindowDetector`, sized for
/// DTLS's 48-bit record sequence numbers instead of TLS's 64-bit ones.
pub trait ReplayDetector: Send + Sync {
    /// Returns `true` and records `seq` as seen if it is acceptable (not a
    /// duplicate, not older than the window). Returns `false` otherwise,
    /// leaving internal state unchanged.
    fn check(&mut self, seq: u64) -> bool;
}

/// A 64-bit sliding bitmap over accepted sequence numbers, per RFC 6347
/// §4.1.2.6. `window_size` bounds how far behind the latest accepted
/// sequence number a record may still be accepted from.
pub struct SlidingWindowDetector {
    larger_seq: u64,
    window: u64,
    window_size: u64,
}

impl SlidingWindowDetector {
    pub fn new(window_size: usize) -> Self {
        SlidingWindowDetector {
            larger_seq: 0,
            window: 0,
            window_size: window_size as u64,
        }
    }
}

impl ReplayDetector for SlidingWindowDetector {
    fn check(&mut self, seq: u64) -> bool {
        if self.window == 0 && self.larger_seq == 0 {
            self.larger_seq = seq;
            self.window = 1;
            return true;
        }

        if seq > self.larger_seq {
            let shift = seq - self.larger_seq;
            if shift >= self.window_size {
                self.window = 1;
            } else {
                self.window <<= shift;
                self.window |= 1;
            }
            self.larger_seq = seq;
            return true;
        }

        let diff = self.larger_seq - seq;
        if diff >= self.window_size {
            return false;
        }

        let mask = 1u64 << diff;
        if self.window & mask != 0 {
            return false;
        }

        self.window |= mask;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_monotonic_sequence() {
        let mut d = SlidingWindowDetector::new(64);
        for seq in 0..10 {
            assert!(d.check(seq));
        }
    }

    #[test]
    fn rejects_duplicate() {
        let mut d = SlidingWindowDetector::new(64);
        assert!(d.check(5));
        assert!(!d.check(5));
    }

    #[test]
    fn accepts_reordered_within_window() {
        let mut d = SlidingWindowDetector::new(64);
        assert!(d.check(10));
        assert!(d.check(8));
        assert!(!d.check(8));
        assert!(d.check(9));
    }

    #[test]
    fn rejects_too_old() {
        let mut d = SlidingWindowDetector::new(64);
        assert!(d.check(1000));
        assert!(!d.check(10));
    }
}
