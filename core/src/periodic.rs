//! Epoch-aligned periodic tasks
//!
//! A [`PeriodicTask`] is the deadline bookkeeping of one schedulable
//! subsystem (sampling, uplink, GPS fix, configuration beacon). Deadlines
//! land on multiples of the period counted from the epoch, optionally pushed
//! later by a random spread so that subsystems sharing a period do not all
//! wake in the same second.
//!
//! Tasks never arm hardware themselves. The run loop collects every task's
//! [`next_wake`](PeriodicTask::next_wake) and sleeps until the earliest one.

use crate::time;

/// Source of wall-clock seconds and randomness for periodic tasks
pub trait TimeBase {
    /// Seconds since the epoch
    fn now_seconds(&self) -> u32;
    fn random_u32(&self) -> u32;
}

/// "Do X every N seconds", aligned to the epoch
pub struct PeriodicTask<'s> {
    base: &'s dyn TimeBase,
    period: u32,
    spread: u32,
    /// 0 = never fires
    next_deadline: u32,
}

impl<'s> PeriodicTask<'s> {
    /// A task that never fires until given a period
    pub fn new(base: &'s dyn TimeBase) -> Self {
        Self {
            base,
            period: 0,
            spread: 0,
            next_deadline: 0,
        }
    }

    pub fn with_period(base: &'s dyn TimeBase, period_secs: u32) -> Self {
        let mut task = Self::new(base);
        task.set_period(period_secs);
        task
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    /// Change the period; 0 disables the task
    ///
    /// The next deadline is recomputed only when the period actually changes.
    pub fn set_period(&mut self, period_secs: u32) {
        if period_secs == self.period {
            return;
        }
        self.period = period_secs;
        self.set_next_deadline(0);
    }

    pub fn spread(&self) -> u32 {
        self.spread
    }

    /// Change the jitter bound and recompute the next deadline
    pub fn set_spread(&mut self, spread_secs: u32) {
        self.spread = spread_secs;
        self.set_next_deadline(0);
    }

    /// Set the next deadline
    ///
    /// A non-zero `ts` is used verbatim; collaborators pass `now` after
    /// out-of-band work to force immediate re-evaluation. Zero computes the
    /// next epoch-aligned boundary after now, plus a random spread bounded
    /// by half a period so it never reaches the following boundary.
    pub fn set_next_deadline(&mut self, ts: u32) {
        if ts != 0 {
            self.next_deadline = ts;
            return;
        }
        if self.period == 0 {
            self.next_deadline = 0;
            return;
        }

        let now = self.base.now_seconds();
        let mut deadline = now.wrapping_add(time::until_next_boundary(now, self.period));
        let bound = self.spread.min(self.period / 2);
        if bound > 0 {
            deadline = deadline.wrapping_add(self.base.random_u32() % bound);
        }
        self.next_deadline = deadline;
    }

    /// Recompute the next deadline from the current time
    pub fn reschedule(&mut self) {
        self.set_next_deadline(0);
    }

    /// Raw deadline in seconds since the epoch, 0 when disabled
    pub fn next_deadline(&self) -> u32 {
        self.next_deadline
    }

    /// Deadline the run loop must wake for, if any
    pub fn next_wake(&self) -> Option<u32> {
        (self.next_deadline != 0).then_some(self.next_deadline)
    }

    /// Whether the deadline has been reached
    ///
    /// With `advance` set, a due task moves on to its next deadline so each
    /// firing is reported once.
    pub fn due(&mut self, advance: bool) -> bool {
        if self.next_deadline == 0 || self.base.now_seconds() < self.next_deadline {
            return false;
        }
        if advance {
            self.set_next_deadline(0);
        }
        true
    }
}
