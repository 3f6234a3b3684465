//! Timer records and handles

use hal_abstractions::Domain;

use crate::time;

/// Expiry callback, invoked from thread mode by [`crate::Scheduler::drain`]
///
/// Closures capture their own context; shared counters or flags inside
/// them need interior mutability (atomics on target).
pub type Callback<'a> = &'a (dyn Fn() + Sync);

/// Handle to a timer slot in the scheduler arena
///
/// The generation changes each time a slot is released, so a handle kept
/// past [`crate::Scheduler::release`] is detected instead of aliasing the
/// slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerId {
    pub(crate) index: u8,
    pub(crate) generation: u16,
}

/// Firing behaviour after the first expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    OneShot,
    /// Re-armed with the stored period after each dispatch
    Periodic,
}

/// How the first deadline of an arming is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Alignment {
    /// `now + period`
    Relative,
    /// Next multiple of the period counted from the epoch
    Absolute,
}

/// Static configuration of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerOptions {
    pub domain: Domain,
    pub mode: Mode,
    pub alignment: Alignment,
}

impl TimerOptions {
    pub const fn one_shot(domain: Domain) -> Self {
        Self {
            domain,
            mode: Mode::OneShot,
            alignment: Alignment::Relative,
        }
    }

    pub const fn periodic(domain: Domain) -> Self {
        Self {
            domain,
            mode: Mode::Periodic,
            alignment: Alignment::Relative,
        }
    }

    /// Align deadlines to multiples of the period since the epoch
    pub const fn absolute(mut self) -> Self {
        self.alignment = Alignment::Absolute;
        self
    }
}

/// Which list, if any, currently holds the timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    Idle,
    /// Armed, in its domain's deadline-ordered list
    Live,
    /// Expired, waiting in the deferred dispatch queue
    Deferred,
}

#[derive(Clone, Copy)]
pub(crate) struct Timer<'a> {
    pub period: u32,
    /// Duration used by the current arming
    pub timeout: u32,
    /// Domain reading captured when the timer was armed
    pub reference: u32,
    pub options: TimerOptions,
    pub callback: Option<Callback<'a>>,
    pub link: Link,
    pub expired: bool,
}

impl<'a> Timer<'a> {
    pub fn new(options: TimerOptions, period: u32, callback: Option<Callback<'a>>) -> Self {
        Self {
            period,
            timeout: period,
            reference: 0,
            options,
            callback,
            link: Link::Idle,
            expired: false,
        }
    }

    /// Capture `now` and compute the timeout for this arming
    ///
    /// `period` must be non-zero.
    pub fn arm(&mut self, now: u32) {
        self.reference = now;
        self.timeout = match self.options.alignment {
            Alignment::Relative => self.period,
            Alignment::Absolute => time::until_next_boundary(now, self.period),
        };
        self.expired = false;
    }

    pub fn remaining(&self, now: u32) -> u32 {
        time::remaining(now, self.reference, self.timeout)
    }

    pub fn deadline(&self) -> u32 {
        self.reference.wrapping_add(self.timeout)
    }

    /// Whether expiry must be handed to the deferred queue
    pub fn needs_dispatch(&self) -> bool {
        self.callback.is_some() || self.options.mode == Mode::Periodic
    }
}
