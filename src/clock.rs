use std::time::Instant;

/// Monotonic milliseconds-since-an-arbitrary-epoch clock.
///
/// Everything in the timer wheel works in absolute millisecond counts rather
/// than raw `Instant`s, which keeps the timer control block a plain `Copy`
/// struct instead of one carrying a platform-specific opaque instant.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since this clock was created.
    pub fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
