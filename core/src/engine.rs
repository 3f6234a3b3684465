//! Timer engine and deferred dispatch queue
//!
//! ## Structure
//!
//! Timers live in a fixed arena of `N` slots. Each time domain keeps a list
//! of slot indices ordered by remaining time to expiry, so the head is always
//! the next alarm to fire and is the only one programmed into the clock.
//!
//! ```text
//!            start()                  on_alarm()               drain()
//!   Idle ───────────────▶ Live ───────────────────▶ Deferred ──────────▶ Idle
//!     ▲                    │   (one-shot, no callback)                     │
//!     │                    └──────────────▶ Idle                           │
//!     └───────────────── periodic: start() again ◀─────────────────────────┘
//! ```
//!
//! A timer is in at most one list at a time. [`Scheduler::on_alarm`] runs in
//! the alarm interrupt: it only moves expired timers to the deferred queue
//! and reprograms the alarm. Callbacks run later from thread mode in
//! [`Scheduler::drain`], outside the critical section.
//!
//! ## Drift
//!
//! A periodic timer is re-armed from the time `drain` runs, not from its
//! missed deadline. Absolute timers re-align to the next boundary so they do
//! not drift; relative timers drift by the dispatch latency of each cycle.

use hal_abstractions::{ClockSource, ClockStep, Domain};
use heapless::{Deque, Vec};
use rand_core::RngCore;

use crate::config::SchedulerConfig;
use crate::critical::Shared;
use crate::error::SchedError;
use crate::periodic::TimeBase;
use crate::timer::{Callback, Link, Mode, Timer, TimerId, TimerOptions};

struct TimerGroup<const N: usize> {
    /// Slot indices, ascending remaining time
    live: Vec<u8, N>,
    min_rearm: u32,
}

impl<const N: usize> TimerGroup<N> {
    fn new(min_rearm: u32) -> Self {
        Self {
            live: Vec::new(),
            min_rearm,
        }
    }
}

#[derive(Clone, Copy)]
struct Slot<'a> {
    generation: u16,
    timer: Option<Timer<'a>>,
}

impl Slot<'_> {
    const EMPTY: Self = Self {
        generation: 0,
        timer: None,
    };
}

fn linked<'s, 'a>(slots: &'s mut [Slot<'a>], index: u8) -> &'s mut Timer<'a> {
    match slots[index as usize].timer.as_mut() {
        Some(timer) => timer,
        None => panic!("empty slot {} linked into a timer list", index),
    }
}

fn remaining_of(slots: &[Slot<'_>], index: u8, now: u32) -> u32 {
    match slots[index as usize].timer.as_ref() {
        Some(timer) => timer.remaining(now),
        None => panic!("empty slot {} linked into a timer list", index),
    }
}

struct Engine<'a, C, R, const N: usize> {
    clock: C,
    rng: R,
    slots: [Slot<'a>; N],
    groups: [TimerGroup<N>; 2],
    deferred: Deque<u8, N>,
}

impl<'a, C: ClockSource, R, const N: usize> Engine<'a, C, R, N> {
    fn shift(domain: Domain) -> u32 {
        match domain {
            Domain::Ticks => C::TICK_SHIFT,
            Domain::Seconds => 0,
        }
    }

    fn lookup(&mut self, id: TimerId) -> Option<&mut Timer<'a>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.timer.as_mut()
    }

    fn timer_mut(&mut self, id: TimerId) -> &mut Timer<'a> {
        match self.lookup(id) {
            Some(timer) => timer,
            None => panic!("stale or unknown timer handle {:?}", id),
        }
    }

    fn allocate(
        &mut self,
        options: TimerOptions,
        period: u32,
        callback: Option<Callback<'a>>,
    ) -> Result<TimerId, SchedError> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.timer.is_none())
            .ok_or(SchedError::CapacityExhausted)?;
        slot.timer = Some(Timer::new(options, period, callback));
        Ok(TimerId {
            index: index as u8,
            generation: slot.generation,
        })
    }

    fn release(&mut self, id: TimerId) {
        self.stop(id);
        let slot = &mut self.slots[id.index as usize];
        slot.timer = None;
        slot.generation = slot.generation.wrapping_add(1);
    }

    fn start(&mut self, id: TimerId) {
        let timer = self.timer_mut(id);
        let (link, period, domain) = (timer.link, timer.period, timer.options.domain);
        match link {
            Link::Live => return,
            // Re-arming an expired timer drops its pending dispatch
            Link::Deferred => self.remove_deferred(id.index),
            Link::Idle => {}
        }

        let now = self.clock.now(domain);
        let timer = self.timer_mut(id);
        timer.link = Link::Idle;
        if period == 0 {
            trace!("timer {} has no period, not armed", id.index);
            return;
        }
        timer.arm(now);
        timer.link = Link::Live;
        let remaining = timer.remaining(now);

        let slots = &self.slots;
        let live = &mut self.groups[domain.index()].live;
        // After any equal entries, so equal deadlines fire in start order
        let pos = live
            .iter()
            .position(|&index| remaining_of(slots, index, now) > remaining)
            .unwrap_or(live.len());
        if live.insert(pos, id.index).is_err() {
            panic!("live list overflow inserting timer {}", id.index);
        }
        trace!("timer {} armed, {} left, position {}", id.index, remaining, pos);

        if pos == 0 {
            self.reprogram(domain);
        }
    }

    fn stop(&mut self, id: TimerId) {
        let timer = self.timer_mut(id);
        let (link, domain) = (timer.link, timer.options.domain);
        timer.link = Link::Idle;
        timer.expired = false;

        match link {
            Link::Idle => {}
            Link::Deferred => self.remove_deferred(id.index),
            Link::Live => {
                let live = &mut self.groups[domain.index()].live;
                let pos = match live.iter().position(|&index| index == id.index) {
                    Some(pos) => pos,
                    None => panic!("running timer {} missing from its live list", id.index),
                };
                live.remove(pos);
                trace!("timer {} stopped", id.index);
                if pos == 0 {
                    self.reprogram(domain);
                }
            }
        }
    }

    fn remove_deferred(&mut self, index: u8) {
        for _ in 0..self.deferred.len() {
            if let Some(queued) = self.deferred.pop_front() {
                if queued != index {
                    // Cannot fail: one entry was just popped
                    let _ = self.deferred.push_back(queued);
                }
            }
        }
    }

    /// Program the domain's alarm for the current head, or cancel it
    fn reprogram(&mut self, domain: Domain) {
        let group = &self.groups[domain.index()];
        match group.live.first() {
            Some(&head) => {
                let now = self.clock.now(domain);
                let duration = remaining_of(&self.slots, head, now).max(group.min_rearm);
                debug!("alarm {} in {}", domain, duration);
                self.clock.arm(domain, duration);
            }
            None => {
                debug!("alarm {} cancelled", domain);
                self.clock.cancel(domain);
            }
        }
    }

    /// Move every expired timer at the head of the domain's list to the
    /// deferred queue, then reprogram the alarm
    fn expire(&mut self, domain: Domain) -> usize {
        let now = self.clock.now(domain);
        let mut fired = 0;

        while let Some(&head) = self.groups[domain.index()].live.first() {
            if remaining_of(&self.slots, head, now) > 0 {
                break;
            }
            self.groups[domain.index()].live.remove(0);

            let timer = linked(&mut self.slots, head);
            timer.expired = true;
            if timer.needs_dispatch() {
                timer.link = Link::Deferred;
                if self.deferred.push_back(head).is_err() {
                    panic!("deferred queue overflow on timer {}", head);
                }
            } else {
                timer.link = Link::Idle;
            }
            fired += 1;
        }

        self.reprogram(domain);
        fired
    }

    fn pop_deferred(&mut self) -> Option<(TimerId, Option<Callback<'a>>, Mode)> {
        let index = self.deferred.pop_front()?;
        let slot = &mut self.slots[index as usize];
        let generation = slot.generation;
        let timer = match slot.timer.as_mut() {
            Some(timer) => timer,
            None => panic!("empty slot {} in deferred queue", index),
        };
        timer.link = Link::Idle;
        Some((TimerId { index, generation }, timer.callback, timer.options.mode))
    }

    /// Carry every live deadline across a wall-clock step
    fn adjust(&mut self, step: ClockStep) {
        if step.is_zero() {
            return;
        }
        for domain in Domain::ALL {
            let delta = step.wrapping_delta(Self::shift(domain));
            for &index in self.groups[domain.index()].live.iter() {
                let timer = linked(&mut self.slots, index);
                timer.reference = timer.reference.wrapping_add(delta);
            }
            self.reprogram(domain);
        }
    }
}

/// Timer engine over a [`ClockSource`], with `N` timer slots
///
/// All methods take `&self`; state is guarded by a critical section so the
/// scheduler can be shared between thread mode and the alarm interrupt.
pub struct Scheduler<'a, C, R, const N: usize> {
    engine: Shared<Engine<'a, C, R, N>>,
}

impl<'a, C: ClockSource, R: RngCore, const N: usize> Scheduler<'a, C, R, N> {
    /// Create the engine; the clock must already be running
    ///
    /// Panics unless `0 < N <= 256`.
    pub fn new(clock: C, rng: R, config: SchedulerConfig) -> Self {
        assert!(N > 0 && N <= 256, "timer arena must hold 1..=256 slots");
        info!(
            "Scheduler ready: {} timer slots, {} ticks/s",
            N,
            1u32 << C::TICK_SHIFT
        );
        Self {
            engine: Shared::new(Engine {
                clock,
                rng,
                slots: [Slot::EMPTY; N],
                groups: [
                    TimerGroup::new(config.min_rearm_ticks),
                    TimerGroup::new(config.min_rearm_secs),
                ],
                deferred: Deque::new(),
            }),
        }
    }

    /// Allocate a stopped timer
    pub fn create_timer(
        &self,
        options: TimerOptions,
        period: u32,
        callback: Option<Callback<'a>>,
    ) -> Result<TimerId, SchedError> {
        self.engine
            .lock(|engine| engine.allocate(options, period, callback))
    }

    /// Stop the timer and free its slot; `id` is dead afterwards
    pub fn release(&self, id: TimerId) {
        self.engine.lock(|engine| engine.release(id));
    }

    /// Arm the timer; no-op while it is already running
    ///
    /// Absolute timers get a timeout reaching the next multiple of the
    /// period. A period of 0 leaves the timer stopped.
    pub fn start(&self, id: TimerId) {
        self.engine.lock(|engine| engine.start(id));
    }

    /// Disarm the timer wherever it is; no-op when it is not running
    pub fn stop(&self, id: TimerId) {
        self.engine.lock(|engine| engine.stop(id));
    }

    /// Stop, then start with the period and options currently stored
    pub fn restart(&self, id: TimerId) {
        self.engine.lock(|engine| {
            engine.stop(id);
            engine.start(id);
        });
    }

    /// Change the stored period; takes effect at the next (re)start
    pub fn set_period(&self, id: TimerId, period: u32) {
        self.engine.lock(|engine| engine.timer_mut(id).period = period);
    }

    pub fn period(&self, id: TimerId) -> u32 {
        self.engine.lock(|engine| engine.timer_mut(id).period)
    }

    pub fn is_running(&self, id: TimerId) -> bool {
        self.engine
            .lock(|engine| engine.timer_mut(id).link == Link::Live)
    }

    /// Whether the timer fired and has not been restarted or stopped since
    pub fn is_expired(&self, id: TimerId) -> bool {
        self.engine.lock(|engine| engine.timer_mut(id).expired)
    }

    /// Time left before expiry, in the timer's domain, while running
    pub fn remaining(&self, id: TimerId) -> Option<u32> {
        self.engine.lock(|engine| {
            let domain = engine.timer_mut(id).options.domain;
            let now = engine.clock.now(domain);
            let timer = engine.timer_mut(id);
            (timer.link == Link::Live).then(|| timer.remaining(now))
        })
    }

    /// Domain reading at which the timer expires, while running
    pub fn deadline(&self, id: TimerId) -> Option<u32> {
        self.engine.lock(|engine| {
            let timer = engine.timer_mut(id);
            (timer.link == Link::Live).then(|| timer.deadline())
        })
    }

    /// Remaining time of the domain's next timer to fire
    pub fn next_expiry(&self, domain: Domain) -> Option<u32> {
        self.engine.lock(|engine| {
            let head = *engine.groups[domain.index()].live.first()?;
            let now = engine.clock.now(domain);
            Some(remaining_of(&engine.slots, head, now))
        })
    }

    /// Running timers of a domain, next to fire first
    pub fn live_timers(&self, domain: Domain) -> Vec<TimerId, N> {
        self.engine.lock(|engine| {
            engine.groups[domain.index()]
                .live
                .iter()
                .map(|&index| TimerId {
                    index,
                    generation: engine.slots[index as usize].generation,
                })
                .collect()
        })
    }

    /// Alarm interrupt entry point for `domain`
    ///
    /// Moves every due timer to the deferred queue and reprograms the alarm.
    /// Never allocates and never runs callbacks.
    pub fn on_alarm(&self, domain: Domain) {
        let fired = self.engine.lock(|engine| engine.expire(domain));
        trace!("alarm {}: {} timers expired", domain, fired);
    }

    /// Whether expired timers are waiting for [`drain`](Self::drain)
    pub fn has_pending(&self) -> bool {
        self.engine.lock(|engine| !engine.deferred.is_empty())
    }

    /// Dispatch the oldest expired timer; false once the queue is empty
    ///
    /// The callback runs outside the critical section. A periodic timer is
    /// then re-armed from the current time, unless the callback stopped or
    /// restarted it itself.
    pub fn dispatch_next(&self) -> bool {
        let Some((id, callback, mode)) = self.engine.lock(|engine| engine.pop_deferred()) else {
            return false;
        };

        if let Some(callback) = callback {
            callback();
        }

        if mode == Mode::Periodic {
            self.engine.lock(|engine| {
                let rearm = matches!(
                    engine.lookup(id),
                    Some(timer) if timer.expired && timer.link == Link::Idle
                );
                if rearm {
                    engine.start(id);
                }
            });
        }
        true
    }

    /// Thread-mode entry point: dispatch every expired timer
    ///
    /// Returns whether anything was dispatched.
    pub fn drain(&self) -> bool {
        let mut dispatched = false;
        while self.dispatch_next() {
            dispatched = true;
        }
        dispatched
    }

    /// Set the calendar and carry every live deadline across the step
    ///
    /// The clock write and the timer adjustment happen in one critical
    /// section, so no deadline observes the new time unadjusted.
    pub fn step_clock(&self, new_secs: u32) -> ClockStep {
        self.engine.lock(|engine| {
            let old = engine.clock.now_seconds();
            engine.clock.set_seconds(new_secs);
            let step = ClockStep::between(old, new_secs);
            info!("Clock stepped {} -> {}", old, new_secs);
            engine.adjust(step);
            step
        })
    }

    /// Apply a step reported by the clock's date-change notification
    pub fn adjust_for_clock_step(&self, step: ClockStep) {
        self.engine.lock(|engine| engine.adjust(step));
    }

    pub fn now(&self, domain: Domain) -> u32 {
        self.engine.lock(|engine| engine.clock.now(domain))
    }

    pub fn now_ticks(&self) -> u32 {
        self.now(Domain::Ticks)
    }

    pub fn now_seconds(&self) -> u32 {
        self.now(Domain::Seconds)
    }
}

impl<C: ClockSource, R: RngCore, const N: usize> TimeBase for Scheduler<'_, C, R, N> {
    fn now_seconds(&self) -> u32 {
        Scheduler::now_seconds(self)
    }

    fn random_u32(&self) -> u32 {
        self.engine.lock(|engine| engine.rng.next_u32())
    }
}
