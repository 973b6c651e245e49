//! Simulation Clock
//!
//! Virtual time for the simulator. The clock only moves when the event loop
//! advances it to the expiry of the event being dispatched; nothing else in
//! the crate may produce a timestamp.

/// Nanoseconds on the simulation clock. The epoch is simulation start (0).
pub type Nanos = i64;

/// Conversion constants
pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Monotonic virtual clock owned by the event loop.
///
/// `advance_to` only moves forward; a backward move is a scheduling bug and
/// panics in debug builds.
#[derive(Debug, Clone)]
pub struct SimClock {
    current: Nanos,
}

impl SimClock {
    /// Create a clock starting at the given time.
    #[inline]
    pub fn new(start_time: Nanos) -> Self {
        Self {
            current: start_time,
        }
    }

    /// Current simulation time in nanoseconds.
    #[inline]
    pub fn now(&self) -> Nanos {
        self.current
    }

    /// Advance to the expiry of the event being dispatched.
    #[inline]
    pub fn advance_to(&mut self, new_time: Nanos) {
        debug_assert!(
            new_time >= self.current,
            "SimClock: cannot go backward from {} to {}",
            self.current,
            new_time
        );
        self.current = new_time;
    }
}
