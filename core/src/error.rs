//! Scheduler error types

/// Scheduler operation errors
///
/// Only resource exhaustion is reported. Misuse (stale handles, a timer
/// linked into two lists) is a programming error and panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedError {
    /// Every timer slot in the arena is in use
    CapacityExhausted,
}

impl core::fmt::Display for SchedError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CapacityExhausted => write!(f, "Timer capacity exhausted"),
        }
    }
}

// Implement core::error::Error for no_std compatibility
impl core::error::Error for SchedError {}
