//! Line-interrupt aggregation
//!
//! Interrupt handlers other than the RTC alarm only record that something
//! happened. Each raise sets a bit and bumps a counter; the run loop takes
//! the whole aggregate in one go and hands it to the subsystems, so a burst
//! of edges on one line costs a single pass of work.

use core::sync::atomic::{AtomicU16, AtomicU32, Ordering};

/// Number of distinct interrupt lines tracked
pub const MAX_LINES: usize = 8;

/// Flags and counters written from interrupt context
pub struct InterruptEvents {
    pending: AtomicU32,
    counts: [AtomicU16; MAX_LINES],
}

impl InterruptEvents {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU16 = AtomicU16::new(0);
        Self {
            pending: AtomicU32::new(0),
            counts: [ZERO; MAX_LINES],
        }
    }

    /// Record one event on `line`; safe to call from any interrupt
    ///
    /// Panics if `line >= MAX_LINES`.
    pub fn raise(&self, line: u8) {
        let counter = &self.counts[line as usize];
        // Saturates at u16::MAX
        let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1));
        self.pending.fetch_or(1 << line, Ordering::AcqRel);
    }

    /// Whether any line has fired since the last [`take`](Self::take)
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }

    /// Take and clear everything recorded so far
    pub fn take(&self) -> EventSet {
        let lines = self.pending.swap(0, Ordering::AcqRel);
        let mut counts = [0u16; MAX_LINES];
        for (line, count) in counts.iter_mut().enumerate() {
            if lines & (1 << line) != 0 {
                *count = self.counts[line].swap(0, Ordering::AcqRel);
            }
        }
        EventSet { lines, counts }
    }
}

impl Default for InterruptEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of aggregated line interrupts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventSet {
    lines: u32,
    counts: [u16; MAX_LINES],
}

impl EventSet {
    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    pub fn contains(&self, line: u8) -> bool {
        (line as usize) < MAX_LINES && self.lines & (1 << line) != 0
    }

    /// Number of raises on `line` (saturating)
    pub fn count(&self, line: u8) -> u16 {
        self.counts.get(line as usize).copied().unwrap_or(0)
    }

    /// Lines that fired, lowest first
    pub fn lines(&self) -> impl Iterator<Item = u8> + '_ {
        (0..MAX_LINES as u8).filter(move |&line| self.contains(line))
    }
}
