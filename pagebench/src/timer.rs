use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Tick(Instant);

impl From<Instant> for Tick {
    fn from(instant: Instant) -> Self {
        Tick(instant)
    }
}

/// Monotonic clock for phase boundaries.
///
/// Instant is backed by CLOCK_MONOTONIC with nanosecond resolution, there is no separate
/// frequency to query.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PhaseTimer;

impl PhaseTimer {
    pub(crate) fn now(&self) -> Tick {
        Tick(Instant::now())
    }

    pub(crate) fn elapsed(&self, from: Tick, to: Tick) -> Duration {
        to.0.saturating_duration_since(from.0)
    }

    // truncated, so total may exceed the sum of two parts by at most 1ms
    pub(crate) fn elapsed_ms(&self, from: Tick, to: Tick) -> u128 {
        self.elapsed(from, to).as_millis()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TimingSample {
    pub(crate) start: Tick,
    pub(crate) mid: Tick,
    pub(crate) end: Tick,
}

impl TimingSample {
    pub(crate) fn allocation(&self) -> Duration {
        PhaseTimer.elapsed(self.start, self.mid)
    }

    pub(crate) fn warm_up(&self) -> Duration {
        PhaseTimer.elapsed(self.mid, self.end)
    }

    pub(crate) fn total(&self) -> Duration {
        PhaseTimer.elapsed(self.start, self.end)
    }

    pub(crate) fn allocation_ms(&self) -> u128 {
        PhaseTimer.elapsed_ms(self.start, self.mid)
    }

    pub(crate) fn warm_up_ms(&self) -> u128 {
        PhaseTimer.elapsed_ms(self.mid, self.end)
    }

    pub(crate) fn total_ms(&self) -> u128 {
        PhaseTimer.elapsed_ms(self.start, self.end)
    }
}
