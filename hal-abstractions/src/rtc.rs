//! Real-time clock seam
//!
//! A board exposes its RTC in two time domains:
//! - **Ticks**: a fine-grained counter running at `2^TICK_SHIFT` Hz
//! - **Seconds**: whole seconds since the 2000-01-01 00:00:00 UTC epoch
//!
//! Both counters are `u32` and are allowed to wrap. Consumers compute elapsed
//! time with `wrapping_sub`, so a single wrap between two readings is harmless.
//!
//! Each domain owns one hardware alarm. Arming a domain replaces any alarm
//! previously armed in that domain.

/// Time domain of a counter or alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Domain {
    /// Sub-second ticks
    Ticks,
    /// Whole seconds since the epoch
    Seconds,
}

impl Domain {
    /// Both domains, in the order the scheduler services them
    pub const ALL: [Domain; 2] = [Domain::Ticks, Domain::Seconds];

    /// Dense index for per-domain tables
    pub const fn index(self) -> usize {
        match self {
            Domain::Ticks => 0,
            Domain::Seconds => 1,
        }
    }
}

/// Wall-clock step applied to the RTC
///
/// Delivered by whoever sets the calendar (GPS fix, network time, operator)
/// so that pending deadlines can be carried across the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockStep {
    /// Clock moved ahead by this many seconds
    Forward(u32),
    /// Clock moved back by this many seconds
    Backward(u32),
}

impl ClockStep {
    /// Step between two second readings taken either side of a clock set
    pub fn between(old_secs: u32, new_secs: u32) -> Self {
        if new_secs >= old_secs {
            ClockStep::Forward(new_secs - old_secs)
        } else {
            ClockStep::Backward(old_secs - new_secs)
        }
    }

    /// Step expressed as a wrapping delta in a domain whose unit is
    /// `2^shift` per second
    pub fn wrapping_delta(self, shift: u32) -> u32 {
        match self {
            ClockStep::Forward(secs) => secs.wrapping_shl(shift),
            ClockStep::Backward(secs) => 0u32.wrapping_sub(secs.wrapping_shl(shift)),
        }
    }

    /// True when the clock did not actually move
    pub fn is_zero(self) -> bool {
        matches!(self, ClockStep::Forward(0) | ClockStep::Backward(0))
    }
}

/// Hardware clock with one alarm per domain
///
/// Implementations must be callable from both thread mode and the alarm
/// interrupt; the scheduler serializes access with a critical section.
pub trait ClockSource {
    /// log2 of ticks per second
    const TICK_SHIFT: u32;

    /// Current fine-grained tick count
    fn now_ticks(&self) -> u32;

    /// Current seconds since the epoch
    fn now_seconds(&self) -> u32;

    /// Current reading in the given domain
    fn now(&self, domain: Domain) -> u32 {
        match domain {
            Domain::Ticks => self.now_ticks(),
            Domain::Seconds => self.now_seconds(),
        }
    }

    /// Set the calendar to `secs` seconds since the epoch
    fn set_seconds(&mut self, secs: u32);

    /// Fire the domain's alarm `duration` units from now
    fn arm(&mut self, domain: Domain, duration: u32);

    /// Disarm the domain's alarm
    fn cancel(&mut self, domain: Domain);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_between() {
        assert_eq!(ClockStep::between(100, 160), ClockStep::Forward(60));
        assert_eq!(ClockStep::between(160, 100), ClockStep::Backward(60));
        assert!(ClockStep::between(5, 5).is_zero());
    }

    #[test]
    fn test_wrapping_delta() {
        assert_eq!(ClockStep::Forward(2).wrapping_delta(0), 2);
        assert_eq!(ClockStep::Forward(2).wrapping_delta(8), 512);
        let back = ClockStep::Backward(2).wrapping_delta(8);
        assert_eq!(1000u32.wrapping_add(back), 488);
    }

    #[test]
    fn test_domain_index() {
        assert_eq!(Domain::Ticks.index(), 0);
        assert_eq!(Domain::Seconds.index(), 1);
    }
}
