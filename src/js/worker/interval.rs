// Interval scheduler - thread-local timers polled once per worker loop iteration

use std::time::{Duration, Instant};

/// Period used when `setInterval` is called without one
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(16);

/// Identifier returned by `setInterval`
pub type IntervalId = i32;

#[derive(Debug)]
struct IntervalTimer<C> {
    id: IntervalId,
    callback: C,
    period: Duration,
    next_fire: Instant,
}

/// Timers owned by a single worker thread
///
/// Never shared and never locked. Each poll fires a timer at most once, no
/// matter how many periods have passed since the previous poll.
#[derive(Debug)]
pub struct IntervalScheduler<C> {
    timers: Vec<IntervalTimer<C>>,
    next_id: IntervalId,
}

impl<C> IntervalScheduler<C> {
    pub fn new() -> Self {
        Self {
            timers: Vec::new(),
            next_id: 1,
        }
    }

    /// Register `callback` to fire every `period`, first at `now + period`
    pub fn set(&mut self, callback: C, period: Duration, now: Instant) -> IntervalId {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.push(IntervalTimer {
            id,
            callback,
            period,
            next_fire: now + period,
        });
        id
    }

    /// Remove a timer, returning its callback. `None` when the id is unknown.
    pub fn clear(&mut self, id: IntervalId) -> Option<C> {
        let index = self.timers.iter().position(|timer| timer.id == id)?;
        Some(self.timers.swap_remove(index).callback)
    }

    /// Collect the timers due at `now` and advance their schedule
    ///
    /// On schedule the next fire time moves by exactly one period. When one or
    /// more periods were missed it is re-based on `now` so there is no backlog.
    pub fn due(&mut self, now: Instant) -> Vec<IntervalId> {
        let mut due = Vec::new();
        for timer in &mut self.timers {
            if timer.next_fire > now {
                continue;
            }
            due.push(timer.id);
            timer.next_fire += timer.period;
            if timer.next_fire <= now {
                timer.next_fire = now + timer.period;
            }
        }
        due
    }

    /// Callback of a live timer
    pub fn callback(&self, id: IntervalId) -> Option<&C> {
        self.timers
            .iter()
            .find(|timer| timer.id == id)
            .map(|timer| &timer.callback)
    }

    /// Drop every timer
    pub fn clear_all(&mut self) {
        self.timers.clear();
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl<C> Default for IntervalScheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a guest-supplied period in milliseconds
///
/// Missing or non-finite values use `default`; negative values clamp to zero.
pub fn period_from_millis(millis: Option<f64>, default: Duration) -> Duration {
    match millis {
        Some(ms) if ms.is_finite() => Duration::from_secs_f64(ms.max(0.0) / 1000.0),
        _ => default,
    }
}
