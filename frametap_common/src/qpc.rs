//! QPC timestamp math.

/// Value-based converter between QPC ticks and milliseconds.
///
/// Carries the session's counter frequency and start timestamp; no
/// environment access, just arithmetic.
#[derive(Debug, Clone, Copy)]
pub struct QpcConverter {
    frequency: u64,
    session_start: u64,
}

impl QpcConverter {
    /// Creates a converter for a counter of `frequency` ticks per second
    /// whose session began at `session_start`.
    pub fn new(frequency: u64, session_start: u64) -> Self {
        debug_assert!(frequency > 0);
        Self {
            frequency,
            session_start,
        }
    }

    /// Converts a tick duration to milliseconds.
    pub fn duration_ms(&self, ticks: u64) -> f64 {
        ticks as f64 * 1_000.0 / self.frequency as f64
    }

    /// Milliseconds between two timestamps, computed on the unsigned
    /// tick difference. A reversed pair wraps, exactly as the raw
    /// counter arithmetic would.
    pub fn delta_unsigned_ms(&self, start: u64, end: u64) -> f64 {
        self.duration_ms(end.wrapping_sub(start))
    }

    /// Signed milliseconds between two timestamps; negative when `end`
    /// precedes `start`.
    pub fn delta_signed_ms(&self, start: u64, end: u64) -> f64 {
        (end.wrapping_sub(start) as i64) as f64 * 1_000.0 / self.frequency as f64
    }

    /// Counter ticks per second.
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Timestamp at which the trace session started.
    pub fn session_start(&self) -> u64 {
        self.session_start
    }
}
