//! Dispatch gates deciding when the next queued command may go on the wire.

use std::time::Duration;
use tokio::time::Instant;

/// Shortest deferred-dispatch timer a [`RateLimit`] will ask for.
pub const MIN_TIMER_DELAY: Duration = Duration::from_millis(10);

/// Outcome of asking a pacing policy whether the head of the queue may be sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    /// Send now.
    Open,
    /// Send once this much time has passed.
    Wait(Duration),
    /// Cannot send until something else happens (a response arrives).
    Blocked,
}

/// Policy deciding when queued commands may be dispatched.
pub trait Pacing {
    /// Whether the head of the queue may be dispatched at `now`.
    fn gate(&self, now: Instant, in_flight: bool) -> Gate;

    /// Record that a command was written at `now`.
    fn record_dispatch(&mut self, now: Instant);

    /// Whether a dispatched command stays in flight until a response settles it.
    fn awaits_response(&self) -> bool;
}

/// Additive rate limiter enforcing a minimum gap between dispatches.
///
/// Unused gap time is never reclaimed, so under backlog commands are spaced
/// by at least `min_gap` but not necessarily by exactly `min_gap`.
#[derive(Clone, Debug)]
pub struct RateLimit {
    min_gap: Duration,
    last_dispatch: Option<Instant>,
}

impl RateLimit {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_dispatch: None,
        }
    }
}

impl Pacing for RateLimit {
    fn gate(&self, now: Instant, _in_flight: bool) -> Gate {
        let Some(last) = self.last_dispatch else {
            return Gate::Open;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed >= self.min_gap {
            Gate::Open
        } else {
            Gate::Wait((self.min_gap - elapsed).max(MIN_TIMER_DELAY))
        }
    }

    fn record_dispatch(&mut self, now: Instant) {
        self.last_dispatch = Some(now);
    }

    fn awaits_response(&self) -> bool {
        false
    }
}

/// Strict single-outstanding-request discipline.
#[derive(Clone, Debug, Default)]
pub struct SingleFlight;

impl Pacing for SingleFlight {
    fn gate(&self, _now: Instant, in_flight: bool) -> Gate {
        if in_flight {
            Gate::Blocked
        } else {
            Gate::Open
        }
    }

    fn record_dispatch(&mut self, _now: Instant) {}

    fn awaits_response(&self) -> bool {
        true
    }
}
