//! Simulated clock and power control for host tests
//!
//! `SimTime` holds a 64-bit tick counter at 256 ticks per second and one
//! pending alarm per domain. Advancing time fires every alarm reached on
//! the way, in order, through an [`AlarmSink`] standing in for the alarm
//! interrupt vector.

use core::sync::atomic::{AtomicU64, Ordering};

use hal_abstractions::{ClockSource, Domain, PowerControl};
use rand_core::RngCore;

use crate::engine::Scheduler;
use crate::events::InterruptEvents;

pub const SIM_TICK_SHIFT: u32 = 8;

const DISARMED: u64 = u64::MAX;

/// Receiver of simulated alarm interrupts
pub trait AlarmSink {
    fn on_alarm(&self, domain: Domain);
}

impl<C: ClockSource, R: RngCore, const N: usize> AlarmSink for Scheduler<'_, C, R, N> {
    fn on_alarm(&self, domain: Domain) {
        Scheduler::on_alarm(self, domain);
    }
}

pub struct SimTime {
    ticks: AtomicU64,
    alarms: [AtomicU64; 2],
}

impl SimTime {
    pub fn at_seconds(secs: u32) -> Self {
        Self {
            ticks: AtomicU64::new((secs as u64) << SIM_TICK_SHIFT),
            alarms: [AtomicU64::new(DISARMED), AtomicU64::new(DISARMED)],
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn now_ticks(&self) -> u32 {
        self.ticks() as u32
    }

    pub fn now_seconds(&self) -> u32 {
        (self.ticks() >> SIM_TICK_SHIFT) as u32
    }

    /// Jump the calendar without firing alarms, keeping the sub-second part
    pub fn set_seconds(&self, secs: u32) {
        let fraction = self.ticks() & ((1 << SIM_TICK_SHIFT) - 1);
        self.ticks
            .store(((secs as u64) << SIM_TICK_SHIFT) | fraction, Ordering::SeqCst);
    }

    fn arm(&self, domain: Domain, duration: u32) {
        let now = self.ticks();
        let at = match domain {
            Domain::Ticks => now + duration as u64,
            Domain::Seconds => ((now >> SIM_TICK_SHIFT) + duration as u64) << SIM_TICK_SHIFT,
        };
        self.alarms[domain.index()].store(at, Ordering::SeqCst);
    }

    fn cancel(&self, domain: Domain) {
        self.alarms[domain.index()].store(DISARMED, Ordering::SeqCst);
    }

    /// Time until the domain's alarm, in that domain's unit
    pub fn alarm_in(&self, domain: Domain) -> Option<u32> {
        let at = self.alarms[domain.index()].load(Ordering::SeqCst);
        if at == DISARMED {
            return None;
        }
        let now = self.ticks();
        Some(match domain {
            Domain::Ticks => (at - now) as u32,
            Domain::Seconds => ((at >> SIM_TICK_SHIFT) - (now >> SIM_TICK_SHIFT)) as u32,
        })
    }

    /// Earliest armed alarm as an absolute tick count
    pub fn next_alarm(&self) -> Option<(u64, Domain)> {
        Domain::ALL
            .into_iter()
            .map(|domain| (self.alarms[domain.index()].load(Ordering::SeqCst), domain))
            .filter(|&(at, _)| at != DISARMED)
            .min_by_key(|&(at, _)| at)
    }

    /// Advance to the next alarm if it falls at or before `limit`, and fire it
    pub fn fire_next(&self, limit: u64, sink: &dyn AlarmSink) -> bool {
        match self.next_alarm() {
            Some((at, domain)) if at <= limit => {
                self.ticks.fetch_max(at, Ordering::SeqCst);
                self.cancel(domain);
                sink.on_alarm(domain);
                true
            }
            _ => false,
        }
    }

    pub fn advance_to(&self, target: u64, sink: &dyn AlarmSink) {
        while self.fire_next(target, sink) {}
        self.ticks.fetch_max(target, Ordering::SeqCst);
    }

    pub fn advance_ticks(&self, ticks: u64, sink: &dyn AlarmSink) {
        self.advance_to(self.ticks() + ticks, sink);
    }

    pub fn advance_secs(&self, secs: u32, sink: &dyn AlarmSink) {
        self.advance_ticks((secs as u64) << SIM_TICK_SHIFT, sink);
    }
}

/// [`ClockSource`] view of a [`SimTime`]
pub struct SimClock<'t> {
    time: &'t SimTime,
}

impl<'t> SimClock<'t> {
    pub fn new(time: &'t SimTime) -> Self {
        Self { time }
    }
}

impl ClockSource for SimClock<'_> {
    const TICK_SHIFT: u32 = SIM_TICK_SHIFT;

    fn now_ticks(&self) -> u32 {
        self.time.now_ticks()
    }

    fn now_seconds(&self) -> u32 {
        self.time.now_seconds()
    }

    fn set_seconds(&mut self, secs: u32) {
        self.time.set_seconds(secs);
    }

    fn arm(&mut self, domain: Domain, duration: u32) {
        self.time.arm(domain, duration);
    }

    fn cancel(&mut self, domain: Domain) {
        self.time.cancel(domain);
    }
}

/// Sleeps by jumping simulated time to the next alarm or injected interrupt
pub struct SimPower<'t> {
    time: &'t SimTime,
    sink: &'t dyn AlarmSink,
    events: &'t InterruptEvents,
    /// Line interrupt to raise at an absolute tick count
    inject: Option<(u64, u8)>,
    /// Ticks that pass while flushing, alarms firing on the way
    flush_ticks: u64,
    pub light_sleeps: u32,
    pub deep_sleeps: u32,
    /// Sleeps entered with nothing armed; the simulation returns at once
    pub unbounded_sleeps: u32,
    pub flushes: u32,
}

impl<'t> SimPower<'t> {
    pub fn new(time: &'t SimTime, sink: &'t dyn AlarmSink, events: &'t InterruptEvents) -> Self {
        Self {
            time,
            sink,
            events,
            inject: None,
            flush_ticks: 0,
            light_sleeps: 0,
            deep_sleeps: 0,
            unbounded_sleeps: 0,
            flushes: 0,
        }
    }

    pub fn inject_at(&mut self, ticks: u64, line: u8) {
        self.inject = Some((ticks, line));
    }

    pub fn slow_flush(&mut self, ticks: u64) {
        self.flush_ticks = ticks;
    }

    fn sleep(&mut self, pending: &dyn Fn() -> bool) {
        if pending() {
            return;
        }
        let alarm = self.time.next_alarm().map(|(at, _)| at);
        match (alarm, self.inject) {
            (Some(at), Some((line_at, _))) if at <= line_at => {
                self.time.fire_next(at, self.sink);
            }
            (_, Some((line_at, line))) => {
                self.time.advance_to(line_at, self.sink);
                self.events.raise(line);
                self.inject = None;
            }
            (Some(at), None) => {
                self.time.fire_next(at, self.sink);
            }
            (None, None) => self.unbounded_sleeps += 1,
        }
    }
}

impl PowerControl for SimPower<'_> {
    fn wait_for_interrupt(&mut self, pending: &dyn Fn() -> bool) {
        self.light_sleeps += 1;
        self.sleep(pending);
    }

    fn deep_sleep(&mut self, pending: &dyn Fn() -> bool) {
        self.deep_sleeps += 1;
        self.sleep(pending);
    }

    fn flush(&mut self) {
        self.flushes += 1;
        if self.flush_ticks > 0 {
            self.time.advance_ticks(self.flush_ticks, self.sink);
        }
    }
}
