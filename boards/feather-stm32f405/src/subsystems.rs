//! Board subsystems driven by the run loop

use core::sync::atomic::{AtomicBool, Ordering};

use defmt::info;
use embassy_stm32::gpio::Output;
use node_core::calendar::CivilDateTime;
use node_core::{EventSet, PeriodicTask, Subsystem, TaskSchedule};

/// Interrupt line number of the sensor alert input
pub const ALERT_LINE: u8 = 0;

/// Set by the heartbeat timer callback
static BLINK: AtomicBool = AtomicBool::new(false);

/// Heartbeat timer callback; runs from the scheduler's drain
pub fn request_blink() {
    BLINK.store(true, Ordering::Release);
}

/// Toggles the red LED each time the heartbeat timer fires
pub struct Heartbeat {
    led: &'static mut Output<'static>,
}

impl Heartbeat {
    pub fn new(led: &'static mut Output<'static>) -> Self {
        Self { led }
    }
}

impl Subsystem for Heartbeat {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn poll(&mut self, _now_secs: u32) -> bool {
        if !BLINK.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.led.toggle();
        true
    }

    fn next_deadline(&self) -> Option<u32> {
        None
    }
}

/// Takes one sample per period, or immediately on a sensor alert
pub struct Sampler {
    task: PeriodicTask<'static>,
    alert: bool,
    samples: u32,
}

impl Sampler {
    pub fn new(mut task: PeriodicTask<'static>, schedule: TaskSchedule) -> Self {
        schedule.apply(&mut task);
        info!(
            "Sampling every {} s, first at {}",
            task.period(),
            task.next_deadline()
        );
        Self {
            task,
            alert: false,
            samples: 0,
        }
    }
}

impl Subsystem for Sampler {
    fn name(&self) -> &'static str {
        "sampler"
    }

    fn poll(&mut self, now_secs: u32) -> bool {
        if self.alert {
            self.alert = false;
            self.task.set_next_deadline(now_secs);
        }
        if !self.task.due(true) {
            return false;
        }
        self.samples += 1;
        info!(
            "Sample {} at {}, next at {}",
            self.samples,
            CivilDateTime::from_epoch_secs(now_secs),
            self.task.next_deadline()
        );
        true
    }

    fn next_deadline(&self) -> Option<u32> {
        self.task.next_wake()
    }

    fn on_events(&mut self, events: &EventSet) -> bool {
        if !events.contains(ALERT_LINE) {
            return false;
        }
        info!("Sensor alert x{}", events.count(ALERT_LINE));
        self.alert = true;
        true
    }
}

/// Periodic work whose peripheral is not fitted on this board (uplink, GPS,
/// beacon); keeps its slot in the schedule and logs each firing
pub struct ScheduledJob {
    name: &'static str,
    task: PeriodicTask<'static>,
    runs: u32,
}

impl ScheduledJob {
    pub fn new(name: &'static str, mut task: PeriodicTask<'static>, schedule: TaskSchedule) -> Self {
        schedule.apply(&mut task);
        info!(
            "{}: every {} s (spread {} s), first at {}",
            name,
            task.period(),
            task.spread(),
            task.next_deadline()
        );
        Self { name, task, runs: 0 }
    }
}

impl Subsystem for ScheduledJob {
    fn name(&self) -> &'static str {
        self.name
    }

    fn poll(&mut self, now_secs: u32) -> bool {
        if !self.task.due(true) {
            return false;
        }
        self.runs += 1;
        info!(
            "{} run {} at {}, next at {}",
            self.name,
            self.runs,
            now_secs,
            self.task.next_deadline()
        );
        true
    }

    fn next_deadline(&self) -> Option<u32> {
        self.task.next_wake()
    }
}
