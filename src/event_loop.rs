//! Event Loop
//!
//! Deterministic single-threaded scheduler over a virtual clock. Work is
//! either a chore (zero-delay, FIFO, runs before the clock advances) or a
//! future event (priority queue ordered by expiry with a monotone event-id
//! tie-break, so co-timed events run in schedule order).
//!
//! The loop also hosts the replay-source adapters: attached `Replayable`
//! sources are driven through `Action::ReplayNext` events, and when the last
//! active source is exhausted the loop schedules its own stop.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;

use tracing::debug;

use crate::clock::{Nanos, SimClock};
use crate::events::Action;
use crate::replay::Replayable;

/// Maximum number of replay sources that may be attached.
pub const MAX_REPLAY_SOURCES: usize = 4096;

/// Tie-break id for events sharing an expiry. Assigned at schedule time from
/// a monotone counter; the stop event uses the maximum id so it always runs
/// after co-timed work.
pub type EventId = i64;

/// A scheduled future event.
#[derive(Debug, Clone)]
pub struct TimedEvent {
    pub event_id: EventId,
    pub expire_time: Nanos,
    pub action: Action,
}

impl PartialEq for TimedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.expire_time == other.expire_time && self.event_id == other.event_id
    }
}

impl Eq for TimedEvent {}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordering by `(expire_time, event_id)`; wrapped in `Reverse` for min-heap use.
impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.expire_time
            .cmp(&other.expire_time)
            .then_with(|| self.event_id.cmp(&other.event_id))
    }
}

/// Errors raised at source-attach time.
#[derive(Debug)]
pub enum LoopError {
    /// Too many replay sources attached.
    CapacityExceeded { limit: usize },
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded { limit } => {
                write!(f, "replay source limit reached ({})", limit)
            }
        }
    }
}

impl std::error::Error for LoopError {}

/// Deterministic discrete-event loop.
///
/// The loop owns its two queues and the attached replay sources; it does not
/// execute actions itself. The session pops work via `pop_chore` /
/// `pop_future` and applies it to the component state it owns, which keeps
/// every action's captured state inspectable.
pub struct EventLoop {
    clock: SimClock,
    chores: VecDeque<(EventId, Action)>,
    future: BinaryHeap<Reverse<TimedEvent>>,
    last_event_id: EventId,
    next_timer_id: u64,
    sources: Vec<Option<Box<dyn Replayable>>>,
    active_sources: usize,
    enabled: bool,
}

impl EventLoop {
    /// Create a loop with the clock at `start`.
    pub fn new(start: Nanos) -> Self {
        Self {
            clock: SimClock::new(start),
            chores: VecDeque::new(),
            future: BinaryHeap::new(),
            last_event_id: 0,
            next_timer_id: 1,
            sources: Vec::new(),
            active_sources: 0,
            enabled: true,
        }
    }

    /// Current simulation time.
    #[inline]
    pub fn now(&self) -> Nanos {
        self.clock.now()
    }

    /// Schedule `action` to run `delta` nanoseconds from now. A zero delta
    /// places the action on the chore queue, which drains FIFO before the
    /// clock advances; anything else becomes a future event.
    pub fn post(&mut self, delta: Nanos, action: Action) -> EventId {
        debug_assert!(delta >= 0, "EventLoop: negative post delta {}", delta);
        self.last_event_id += 1;
        let event_id = self.last_event_id;
        if delta == 0 {
            self.chores.push_back((event_id, action));
        } else {
            self.future.push(Reverse(TimedEvent {
                event_id,
                expire_time: self.now() + delta,
                action,
            }));
        }
        event_id
    }

    /// Schedule the loop to halt `delta` nanoseconds from now. The stop is a
    /// future event carrying the maximum tie-break id, so every other event
    /// scheduled for the same instant runs first.
    pub fn stop(&mut self, delta: Nanos) {
        self.future.push(Reverse(TimedEvent {
            event_id: EventId::MAX,
            expire_time: self.now() + delta,
            action: Action::Stop,
        }));
    }

    /// Allocate a timer id and schedule its callback.
    pub fn schedule_timer(&mut self, delay: Nanos) -> u64 {
        let timer_id = self.next_timer_id;
        self.next_timer_id += 1;
        self.post(delay, Action::Timer { timer_id });
        timer_id
    }

    /// Attach a replay source. Skips it past the current time and schedules
    /// its first dispatch; an already-exhausted source is retired on the
    /// spot. Fails loudly beyond the source cap.
    pub fn add(&mut self, mut source: Box<dyn Replayable>) -> Result<usize, LoopError> {
        if self.sources.len() >= MAX_REPLAY_SOURCES {
            return Err(LoopError::CapacityExceeded {
                limit: MAX_REPLAY_SOURCES,
            });
        }

        source.skip(self.now());
        let slot = self.sources.len();
        let next = source.next_event_time();
        self.sources.push(Some(source));
        self.active_sources += 1;

        if next == Nanos::MAX {
            self.retire_source(slot);
        } else {
            let delta = (next - self.now()).max(0);
            self.post(delta, Action::ReplayNext { slot });
        }
        debug!(slot, next_event_time = next, "replay source attached");
        Ok(slot)
    }

    /// Remove a source for dispatching; pair with `restore_source`.
    pub fn take_source(&mut self, slot: usize) -> Option<Box<dyn Replayable>> {
        self.sources.get_mut(slot).and_then(|s| s.take())
    }

    /// Put a source back after dispatching.
    pub fn restore_source(&mut self, slot: usize, source: Box<dyn Replayable>) {
        self.sources[slot] = Some(source);
    }

    /// Retire an exhausted source. When the active count reaches zero the
    /// loop schedules `stop(0)` so the session unwinds after co-timed work.
    pub fn retire_source(&mut self, slot: usize) {
        self.sources[slot] = None;
        self.active_sources -= 1;
        debug!(slot, remaining = self.active_sources, "replay source exhausted");
        if self.active_sources == 0 {
            self.stop(0);
        }
    }

    /// Number of sources still producing events.
    #[inline]
    pub fn active_sources(&self) -> usize {
        self.active_sources
    }

    /// Re-enable the loop and fast-forward the clock to the soonest future
    /// event. Called on `dispatch()` entry; the fast-forward is what skips
    /// the idle warm-up period to the first market-data record.
    pub fn begin_dispatch(&mut self) {
        self.enabled = true;
        if let Some(Reverse(ev)) = self.future.peek() {
            self.clock.advance_to(ev.expire_time);
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Halt the dispatch loop; remaining events stay queued.
    #[inline]
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Whether either queue still holds work.
    #[inline]
    pub fn has_pending(&self) -> bool {
        !self.chores.is_empty() || !self.future.is_empty()
    }

    /// Next chore in FIFO order.
    pub fn pop_chore(&mut self) -> Option<Action> {
        self.chores.pop_front().map(|(_, action)| action)
    }

    /// Pop the soonest future event and advance the clock to its expiry.
    pub fn pop_future(&mut self) -> Option<Action> {
        let Reverse(ev) = self.future.pop()?;
        self.clock.advance_to(ev.expire_time);
        Some(ev.action)
    }

    /// Expiry of the soonest future event, if any.
    pub fn peek_future_time(&self) -> Option<Nanos> {
        self.future.peek().map(|Reverse(ev)| ev.expire_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::QuoteSink;

    /// Replay stub emitting nothing at fixed timestamps.
    struct StubSource {
        times: Vec<Nanos>,
        index: usize,
    }

    impl StubSource {
        fn new(times: Vec<Nanos>) -> Self {
            Self { times, index: 0 }
        }
    }

    impl Replayable for StubSource {
        fn next_event_time(&self) -> Nanos {
            self.times.get(self.index).copied().unwrap_or(Nanos::MAX)
        }

        fn dispatch_next(&mut self, out: &mut dyn QuoteSink) {
            self.index += 1;
            out.end_batch();
        }

        fn skip(&mut self, ts: Nanos) {
            while self.next_event_time() < ts {
                self.index += 1;
            }
        }
    }

    #[test]
    fn test_future_events_run_in_time_order() {
        let mut el = EventLoop::new(0);
        el.post(2000, Action::Timer { timer_id: 2 });
        el.post(1000, Action::Timer { timer_id: 1 });
        el.post(3000, Action::Timer { timer_id: 3 });

        assert_eq!(el.pop_future(), Some(Action::Timer { timer_id: 1 }));
        assert_eq!(el.now(), 1000);
        assert_eq!(el.pop_future(), Some(Action::Timer { timer_id: 2 }));
        assert_eq!(el.pop_future(), Some(Action::Timer { timer_id: 3 }));
        assert_eq!(el.now(), 3000);
        assert_eq!(el.pop_future(), None);
    }

    #[test]
    fn test_equal_expiry_ties_break_by_schedule_order() {
        let mut el = EventLoop::new(0);
        for timer_id in 1..=10 {
            el.post(500, Action::Timer { timer_id });
        }
        for timer_id in 1..=10 {
            assert_eq!(el.pop_future(), Some(Action::Timer { timer_id }));
        }
    }

    #[test]
    fn test_chores_are_fifo_and_do_not_advance_clock() {
        let mut el = EventLoop::new(100);
        el.post(0, Action::Timer { timer_id: 1 });
        el.post(0, Action::Timer { timer_id: 2 });

        assert_eq!(el.pop_chore(), Some(Action::Timer { timer_id: 1 }));
        assert_eq!(el.pop_chore(), Some(Action::Timer { timer_id: 2 }));
        assert_eq!(el.pop_chore(), None);
        assert_eq!(el.now(), 100);
    }

    #[test]
    fn test_stop_runs_after_co_timed_events() {
        let mut el = EventLoop::new(0);
        el.stop(1000);
        el.post(1000, Action::Timer { timer_id: 1 });

        // Same expiry, but stop carries the maximum id.
        assert_eq!(el.pop_future(), Some(Action::Timer { timer_id: 1 }));
        assert_eq!(el.pop_future(), Some(Action::Stop));
    }

    #[test]
    fn test_begin_dispatch_fast_forwards() {
        let mut el = EventLoop::new(0);
        el.post(5_000_000, Action::Timer { timer_id: 1 });
        el.begin_dispatch();
        assert_eq!(el.now(), 5_000_000);
    }

    #[test]
    fn test_add_skips_and_schedules_first_dispatch() {
        let mut el = EventLoop::new(500);
        let slot = el
            .add(Box::new(StubSource::new(vec![100, 400, 900, 1500])))
            .unwrap();
        assert_eq!(slot, 0);
        assert_eq!(el.active_sources(), 1);
        // Events before now were skipped; first dispatch lands at 900.
        assert_eq!(el.peek_future_time(), Some(900));
    }

    #[test]
    fn test_exhausted_source_schedules_stop() {
        let mut el = EventLoop::new(0);
        el.add(Box::new(StubSource::new(vec![]))).unwrap();
        assert_eq!(el.active_sources(), 0);
        assert_eq!(el.pop_future(), Some(Action::Stop));
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut el = EventLoop::new(0);
        for _ in 0..MAX_REPLAY_SOURCES {
            el.add(Box::new(StubSource::new(vec![]))).unwrap();
        }
        let err = el.add(Box::new(StubSource::new(vec![]))).unwrap_err();
        assert!(matches!(err, LoopError::CapacityExceeded { .. }));
    }

    #[test]
    fn test_timer_ids_are_unique() {
        let mut el = EventLoop::new(0);
        let a = el.schedule_timer(10);
        let b = el.schedule_timer(10);
        assert_ne!(a, b);
    }
}
