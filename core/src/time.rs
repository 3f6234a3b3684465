//! Time-unit arithmetic shared by the engine and the boards
//!
//! Ticks are a power-of-two subdivision of one second, so every conversion
//! here is exact integer arithmetic. Counters are `u32` and wrap; elapsed
//! time is always `now.wrapping_sub(since)`.

/// Calendar year of the timestamp epoch (2000-01-01 00:00:00 UTC)
pub const EPOCH_YEAR: u16 = 2000;

const MILLIS_PER_SECOND: u64 = 1000;

/// Whole seconds to ticks at `2^shift` ticks per second (wrapping)
pub const fn ticks_from_secs(secs: u32, shift: u32) -> u32 {
    secs.wrapping_shl(shift)
}

/// Ticks to whole seconds, truncating
pub const fn secs_from_ticks(ticks: u32, shift: u32) -> u32 {
    ticks >> shift
}

/// Milliseconds to ticks, rounded up so the duration is never shortened
pub const fn ticks_from_millis(ms: u32, shift: u32) -> u32 {
    (((ms as u64) << shift).div_ceil(MILLIS_PER_SECOND)) as u32
}

/// Ticks to milliseconds, truncating
pub const fn millis_from_ticks(ticks: u32, shift: u32) -> u32 {
    (((ticks as u64) * MILLIS_PER_SECOND) >> shift) as u32
}

/// Time elapsed from `since` to `now`, tolerating one counter wrap
pub const fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Time left until `since + timeout`, clamped at zero once due
pub const fn remaining(now: u32, since: u32, timeout: u32) -> u32 {
    timeout.saturating_sub(elapsed(now, since))
}

/// Time from `now` to the absolute reading `at`
///
/// Readings more than half the counter range ahead count as already passed
/// and give zero.
pub const fn until(now: u32, at: u32) -> u32 {
    let ahead = at.wrapping_sub(now);
    if ahead > i32::MAX as u32 {
        0
    } else {
        ahead
    }
}

/// Distance from `now` to the next multiple of `period` strictly after it
///
/// `period` must be non-zero.
pub const fn until_next_boundary(now: u32, period: u32) -> u32 {
    period - now % period
}
