//! Run loop and sleep arbiter
//!
//! One outer iteration ([`RunLoop::run_once`]):
//!
//! 1. Drain expired timers and poll every subsystem, handing them any
//!    aggregated line interrupts, until `quiet_passes` passes in a row do
//!    no work.
//! 2. Take a short settle sleep. Waking for anything other than the settle
//!    timer means a burst of interrupts is still arriving: go back to 1.
//! 3. Arm the wake timer for the earliest subsystem deadline and deep sleep.
//!
//! A deadline that is already due skips both sleeps.

use hal_abstractions::{ClockSource, Domain, PowerControl};
use rand_core::RngCore;

use crate::config::RunLoopConfig;
use crate::engine::Scheduler;
use crate::error::SchedError;
use crate::events::{EventSet, InterruptEvents};
use crate::time;
use crate::timer::{TimerId, TimerOptions};

/// A schedulable part of the node: sensors, uplink, GPS, beacon
pub trait Subsystem {
    fn name(&self) -> &'static str;

    /// Perform at most one unit of pending work; true if anything was done
    fn poll(&mut self, now_secs: u32) -> bool;

    /// Earliest time this subsystem needs the processor awake for
    fn next_deadline(&self) -> Option<u32>;

    /// Line interrupts raised since the last pass; true if handled
    fn on_events(&mut self, _events: &EventSet) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopState {
    /// Some component reported work on the last pass
    Draining,
    /// Enough consecutive passes did nothing
    IdleCandidate,
    /// Bounded settle sleep, interruptible by any source
    ShortSleep,
    /// Sleeping until the next deadline
    DeepSleep,
}

/// Outcome of one outer iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cycle {
    /// Woken early from the settle sleep
    Disturbed,
    /// The earliest deadline had already passed; no sleep was taken
    Overdue { next_wake: u32 },
    /// Returned from deep sleep
    Slept { next_wake: Option<u32> },
}

/// Earliest deadline across `subsystems`
pub fn next_wake(subsystems: &[&mut dyn Subsystem]) -> Option<u32> {
    subsystems.iter().filter_map(|sub| sub.next_deadline()).min()
}

pub struct RunLoop<'s, 'a, C, R, P, const N: usize> {
    sched: &'s Scheduler<'a, C, R, N>,
    events: &'s InterruptEvents,
    power: P,
    config: RunLoopConfig,
    wake_timer: TimerId,
    settle_timer: TimerId,
    state: LoopState,
    first_run: bool,
    wall_clock: u32,
    deep_sleeps: u32,
}

impl<'s, 'a, C, R, P, const N: usize> RunLoop<'s, 'a, C, R, P, N>
where
    C: ClockSource,
    R: RngCore,
    P: PowerControl,
{
    /// Allocates the wake and settle timers from `sched`
    pub fn new(
        sched: &'s Scheduler<'a, C, R, N>,
        events: &'s InterruptEvents,
        power: P,
        config: RunLoopConfig,
    ) -> Result<Self, SchedError> {
        let wake_timer = sched.create_timer(TimerOptions::one_shot(Domain::Seconds), 0, None)?;
        let settle_ticks = time::ticks_from_millis(config.settle_ms, C::TICK_SHIFT);
        let settle_timer =
            sched.create_timer(TimerOptions::one_shot(Domain::Ticks), settle_ticks, None)?;
        let wall_clock = sched.now_seconds();
        info!(
            "Run loop ready: settle {} ms ({} ticks), wall clock {}",
            config.settle_ms,
            settle_ticks,
            wall_clock
        );

        Ok(Self {
            sched,
            events,
            power,
            config,
            wake_timer,
            settle_timer,
            state: LoopState::Draining,
            first_run: true,
            wall_clock,
            deep_sleeps: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// True until the first return from deep sleep
    pub fn first_run(&self) -> bool {
        self.first_run
    }

    /// Seconds since the epoch, sampled after the last deep sleep
    pub fn wall_clock(&self) -> u32 {
        self.wall_clock
    }

    pub fn deep_sleeps(&self) -> u32 {
        self.deep_sleeps
    }

    pub fn power(&self) -> &P {
        &self.power
    }

    /// Drain timers and poll subsystems until quiescent; returns the pass count
    pub fn drain_until_quiet(&mut self, subsystems: &mut [&mut dyn Subsystem]) -> u32 {
        self.state = LoopState::Draining;
        let mut quiet = 0;
        let mut passes = 0;

        while quiet < self.config.quiet_passes {
            passes += 1;
            let mut busy = self.sched.drain();

            let now = self.sched.now_seconds();
            for sub in subsystems.iter_mut() {
                if sub.poll(now) {
                    trace!("{} did work", sub.name());
                    busy = true;
                }
            }

            let events = self.events.take();
            if !events.is_empty() {
                busy = true;
                for sub in subsystems.iter_mut() {
                    sub.on_events(&events);
                }
            }

            quiet = if busy { 0 } else { quiet + 1 };
        }

        self.state = LoopState::IdleCandidate;
        passes
    }

    /// One outer iteration: drain, settle, then deep sleep until the next deadline
    pub fn run_once(&mut self, subsystems: &mut [&mut dyn Subsystem]) -> Cycle {
        self.drain_until_quiet(subsystems);

        if let Some(next_wake) = self.overdue(subsystems) {
            return Cycle::Overdue { next_wake };
        }

        let sched = self.sched;
        let events = self.events;
        let pending = || events.is_pending() || sched.has_pending();
        let settle_timer = self.settle_timer;
        let wake_timer = self.wake_timer;

        // Callback-less one-shots never reach the deferred queue, so each
        // sleep also checks its own timer
        self.state = LoopState::ShortSleep;
        sched.restart(settle_timer);
        self.power.wait_for_interrupt(&|| pending() || sched.is_expired(settle_timer));
        let settled = sched.is_expired(settle_timer) && !pending();
        sched.stop(settle_timer);
        if !settled {
            debug!("Settle sleep disturbed");
            self.state = LoopState::Draining;
            return Cycle::Disturbed;
        }

        if let Some(next_wake) = self.overdue(subsystems) {
            return Cycle::Overdue { next_wake };
        }

        let now = sched.now_seconds();
        let next_wake = next_wake(subsystems);
        match next_wake {
            Some(at) => {
                let secs = at.saturating_sub(now).max(1);
                debug!("Deep sleep for {} s until {}", secs, at);
                sched.set_period(wake_timer, secs);
                sched.restart(wake_timer);
            }
            None => debug!(
                "Deep sleep with no deadline, timers in {} ticks / {} s",
                sched.next_expiry(Domain::Ticks),
                sched.next_expiry(Domain::Seconds)
            ),
        }

        self.state = LoopState::DeepSleep;
        self.power.flush();
        self.power.deep_sleep(&|| pending() || sched.is_expired(wake_timer));
        sched.stop(wake_timer);

        self.first_run = false;
        self.wall_clock = sched.now_seconds();
        self.deep_sleeps += 1;
        self.state = LoopState::Draining;
        Cycle::Slept { next_wake }
    }

    /// Run forever
    pub fn run(&mut self, subsystems: &mut [&mut dyn Subsystem]) -> ! {
        loop {
            self.run_once(subsystems);
        }
    }

    fn overdue(&mut self, subsystems: &[&mut dyn Subsystem]) -> Option<u32> {
        let next_wake = next_wake(subsystems)?;
        let now = self.sched.now_seconds();
        if next_wake > now {
            return None;
        }
        warn!("Wake deadline {} already passed at {}", next_wake, now);
        self.state = LoopState::Draining;
        Some(next_wake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::periodic::PeriodicTask;
    use crate::sim::{SimClock, SimPower, SimTime};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    type TestScheduler<'a, 't> = Scheduler<'a, SimClock<'t>, SmallRng, 8>;

    fn scheduler<'a, 't>(time: &'t SimTime) -> TestScheduler<'a, 't> {
        Scheduler::new(
            SimClock::new(time),
            SmallRng::seed_from_u64(0x5EED),
            SchedulerConfig::default(),
        )
    }

    struct Ticker<'s> {
        task: PeriodicTask<'s>,
        fired: u32,
    }

    impl<'s> Ticker<'s> {
        fn new(task: PeriodicTask<'s>) -> Self {
            Self { task, fired: 0 }
        }
    }

    impl Subsystem for Ticker<'_> {
        fn name(&self) -> &'static str {
            "ticker"
        }

        fn poll(&mut self, _now_secs: u32) -> bool {
            if self.task.due(true) {
                self.fired += 1;
                return true;
            }
            false
        }

        fn next_deadline(&self) -> Option<u32> {
            self.task.next_wake()
        }
    }

    struct Fixed {
        deadline: Option<u32>,
        lines_seen: u32,
    }

    impl Fixed {
        fn new(deadline: Option<u32>) -> Self {
            Self {
                deadline,
                lines_seen: 0,
            }
        }
    }

    impl Subsystem for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn poll(&mut self, _now_secs: u32) -> bool {
            false
        }

        fn next_deadline(&self) -> Option<u32> {
            self.deadline
        }

        fn on_events(&mut self, events: &EventSet) -> bool {
            self.lines_seen |= events.lines().fold(0u32, |acc, line| acc | 1u32 << line);
            true
        }
    }

    #[test]
    fn test_two_periodic_tasks_end_to_end() {
        let time = SimTime::at_seconds(0);
        let events = InterruptEvents::new();
        let sched = scheduler(&time);
        let mut a = Ticker::new(PeriodicTask::with_period(&sched, 10));
        let mut b = Ticker::new(PeriodicTask::with_period(&sched, 15));
        let power = SimPower::new(&time, &sched, &events);
        let mut run_loop = RunLoop::new(&sched, &events, power, RunLoopConfig::default()).unwrap();

        time.advance_secs(1, &sched);
        assert_eq!(next_wake(&[&mut a, &mut b]), Some(10));

        let cycle = run_loop.run_once(&mut [&mut a, &mut b]);
        assert_eq!(cycle, Cycle::Slept { next_wake: Some(10) });
        assert_eq!(time.now_seconds(), 10);
        assert_eq!(a.fired, 0);

        let cycle = run_loop.run_once(&mut [&mut a, &mut b]);
        assert_eq!(cycle, Cycle::Slept { next_wake: Some(15) });
        assert_eq!(a.fired, 1);
        assert_eq!(a.task.next_deadline(), 20);
        assert_eq!(b.fired, 0);

        let cycle = run_loop.run_once(&mut [&mut a, &mut b]);
        assert_eq!(cycle, Cycle::Slept { next_wake: Some(20) });
        assert_eq!(b.fired, 1);
        assert_eq!(b.task.next_deadline(), 30);
        assert_eq!(a.fired, 1);
        assert_eq!(a.task.next_deadline(), 20);
        assert_eq!(run_loop.deep_sleeps(), 3);
    }

    #[test]
    fn test_next_wake_is_earliest_deadline() {
        let mut subs = [
            Fixed::new(Some(100)),
            Fixed::new(Some(250)),
            Fixed::new(Some(80)),
            Fixed::new(None),
        ];
        let [s0, s1, s2, s3] = &mut subs;
        let list: [&mut dyn Subsystem; 4] = [s0, s1, s2, s3];
        assert_eq!(next_wake(&list), Some(80));
    }

    #[test]
    fn test_overdue_deadline_skips_sleep() {
        let time = SimTime::at_seconds(100);
        let events = InterruptEvents::new();
        let sched = scheduler(&time);
        let power = SimPower::new(&time, &sched, &events);
        let mut run_loop = RunLoop::new(&sched, &events, power, RunLoopConfig::default()).unwrap();
        let mut late = Fixed::new(Some(80));
        let mut later = Fixed::new(Some(250));

        let cycle = run_loop.run_once(&mut [&mut late, &mut later]);
        assert_eq!(cycle, Cycle::Overdue { next_wake: 80 });
        assert_eq!(run_loop.power().deep_sleeps, 0);
        assert_eq!(run_loop.power().light_sleeps, 0);
        assert_eq!(run_loop.state(), LoopState::Draining);
        assert!(run_loop.first_run());
    }

    #[test]
    fn test_line_interrupt_disturbs_settle_sleep() {
        let time = SimTime::at_seconds(500);
        let events = InterruptEvents::new();
        let sched = scheduler(&time);
        let mut power = SimPower::new(&time, &sched, &events);
        power.inject_at(time.ticks() + 10, 3);
        let mut run_loop = RunLoop::new(&sched, &events, power, RunLoopConfig::default()).unwrap();
        let mut sensor = Fixed::new(Some(900));

        let cycle = run_loop.run_once(&mut [&mut sensor]);
        assert_eq!(cycle, Cycle::Disturbed);
        assert_eq!(run_loop.power().deep_sleeps, 0);
        assert_eq!(sensor.lines_seen, 0);
        assert!(!sched.is_running(run_loop.settle_timer));

        let cycle = run_loop.run_once(&mut [&mut sensor]);
        assert_eq!(sensor.lines_seen, 1 << 3);
        assert_eq!(cycle, Cycle::Slept { next_wake: Some(900) });
        assert_eq!(time.now_seconds(), 900);
    }

    #[test]
    fn test_deep_sleep_refreshes_wall_clock() {
        let time = SimTime::at_seconds(1_000);
        let events = InterruptEvents::new();
        let sched = scheduler(&time);
        let power = SimPower::new(&time, &sched, &events);
        let mut run_loop = RunLoop::new(&sched, &events, power, RunLoopConfig::default()).unwrap();
        let mut sampler = Ticker::new(PeriodicTask::with_period(&sched, 600));
        assert!(run_loop.first_run());
        assert_eq!(run_loop.wall_clock(), 1_000);

        let cycle = run_loop.run_once(&mut [&mut sampler]);
        assert_eq!(cycle, Cycle::Slept { next_wake: Some(1_200) });
        assert!(!run_loop.first_run());
        assert_eq!(run_loop.wall_clock(), 1_200);
        assert_eq!(run_loop.power().flushes, 1);
        assert!(!sched.is_running(run_loop.wake_timer));
    }

    #[test]
    fn test_wake_alarm_firing_during_flush_skips_deep_sleep() {
        let time = SimTime::at_seconds(100);
        let events = InterruptEvents::new();
        let sched = scheduler(&time);
        let mut power = SimPower::new(&time, &sched, &events);
        power.slow_flush(640);
        let mut run_loop = RunLoop::new(&sched, &events, power, RunLoopConfig::default()).unwrap();
        let mut sensor = Fixed::new(Some(102));

        let cycle = run_loop.run_once(&mut [&mut sensor]);
        assert_eq!(cycle, Cycle::Slept { next_wake: Some(102) });
        assert_eq!(time.now_seconds(), 102);
        assert_eq!(run_loop.power().deep_sleeps, 1);
        assert_eq!(run_loop.power().unbounded_sleeps, 0);
        assert!(!sched.is_expired(run_loop.wake_timer));
        assert_eq!(time.next_alarm(), None);
    }

    #[test]
    fn test_no_deadline_sleeps_unbounded() {
        let time = SimTime::at_seconds(0);
        let events = InterruptEvents::new();
        let sched = scheduler(&time);
        let power = SimPower::new(&time, &sched, &events);
        let mut run_loop = RunLoop::new(&sched, &events, power, RunLoopConfig::default()).unwrap();
        let mut idle = Fixed::new(None);

        let cycle = run_loop.run_once(&mut [&mut idle]);
        assert_eq!(cycle, Cycle::Slept { next_wake: None });
        assert_eq!(run_loop.power().unbounded_sleeps, 1);
    }

    #[test]
    fn test_timer_callbacks_run_while_draining() {
        use core::sync::atomic::{AtomicU32, Ordering};

        let hits = AtomicU32::new(0);
        let callback = || {
            hits.fetch_add(1, Ordering::Relaxed);
        };
        let time = SimTime::at_seconds(0);
        let events = InterruptEvents::new();
        let sched = scheduler(&time);
        let heartbeat = sched
            .create_timer(TimerOptions::periodic(Domain::Seconds), 5, Some(&callback))
            .unwrap();
        sched.start(heartbeat);
        let power = SimPower::new(&time, &sched, &events);
        let mut run_loop = RunLoop::new(&sched, &events, power, RunLoopConfig::default()).unwrap();
        let mut idle = Fixed::new(None);

        // The heartbeat alarm bounds the otherwise unbounded deep sleep
        let cycle = run_loop.run_once(&mut [&mut idle]);
        assert_eq!(cycle, Cycle::Slept { next_wake: None });
        assert_eq!(time.now_seconds(), 5);
        assert_eq!(run_loop.power().unbounded_sleeps, 0);

        run_loop.drain_until_quiet(&mut [&mut idle]);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(sched.deadline(heartbeat), Some(10));
        assert_eq!(run_loop.state(), LoopState::IdleCandidate);
    }
}
