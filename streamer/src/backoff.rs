//! Exponential backoff for the upstream reconnect loop (§4.A "Failure",
//! §5 "Upstream reconnect uses exponential backoff"): initial 100ms, cap
//! 10s, reset on a healthy frame.

use std::time::Duration;

pub struct Backoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self { Self::new(Duration::from_millis(100), Duration::from_secs(10)) }
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self { Self { initial, cap, current: initial } }

    /// The delay to wait before the next reconnect attempt; doubles for
    /// next time, capped.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    /// Call on a healthy frame (successful stream item) to reset the
    /// delay back to `initial`.
    pub fn reset(&mut self) { self.current = self.initial; }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap_then_resets() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(b.next(), Duration::from_millis(100));
        assert_eq!(b.next(), Duration::from_millis(200));
        assert_eq!(b.next(), Duration::from_millis(400));
        for _ in 0..10 {
            b.next();
        }
        assert_eq!(b.next(), Duration::from_secs(10));
        b.reset();
        assert_eq!(b.next(), Duration::from_millis(100));
    }
}
