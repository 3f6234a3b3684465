//! Scheduler and node scheduling configuration

use crate::periodic::PeriodicTask;

/// Timer engine configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SchedulerConfig {
    /// Shortest alarm ever programmed in the ticks domain
    pub min_rearm_ticks: u32,
    /// Shortest alarm ever programmed in the seconds domain
    pub min_rearm_secs: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_rearm_ticks: 2,
            min_rearm_secs: 1,
        }
    }
}

/// Run loop / sleep arbiter configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RunLoopConfig {
    /// Length of the settle sleep taken before committing to deep sleep
    pub settle_ms: u32,
    /// Consecutive passes without work before the loop counts as idle
    pub quiet_passes: u8,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            settle_ms: 300,
            quiet_passes: 2,
        }
    }
}

/// Period and jitter bound of one schedulable subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskSchedule {
    /// Seconds between firings, 0 = never
    pub period_secs: u32,
    /// Maximum extra random delay in seconds
    pub spread_secs: u32,
}

impl TaskSchedule {
    pub const fn new(period_secs: u32, spread_secs: u32) -> Self {
        Self {
            period_secs,
            spread_secs,
        }
    }

    /// Configure a task with this schedule
    pub fn apply(&self, task: &mut PeriodicTask<'_>) {
        task.set_spread(self.spread_secs);
        task.set_period(self.period_secs);
    }
}

/// Schedules of the node's periodic subsystems
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeSchedule {
    /// Sensor sampling
    pub sample: TaskSchedule,
    /// Uplink of buffered samples
    pub transmit: TaskSchedule,
    /// GPS position/time fix
    pub gps: TaskSchedule,
    /// Configuration beacon
    pub beacon: TaskSchedule,
}

impl Default for NodeSchedule {
    fn default() -> Self {
        Self {
            sample: TaskSchedule::new(600, 0),
            transmit: TaskSchedule::new(900, 60),
            gps: TaskSchedule::new(3600, 0),
            beacon: TaskSchedule::new(86_400, 300),
        }
    }
}
