//! Platform-agnostic core logic for IoT firmware
//!
//! This crate contains the scheduling core shared across all supported
//! boards: the deadline-ordered timer engine, the epoch-aligned periodic
//! task abstraction, and the run loop that decides how long the processor
//! may sleep. It has NO hardware dependencies; boards plug in through the
//! traits in `hal-abstractions`.
//!
//! ## Contexts
//!
//! Two execution contexts touch the scheduler:
//! - the RTC alarm interrupt, which may only call [`Scheduler::on_alarm`]
//! - thread mode (the run loop), which calls everything else
//!
//! All shared state lives behind a critical section so the two stay
//! consistent on a single core.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

#[macro_use]
mod fmt;

pub mod calendar;
pub mod config;
pub mod critical;
pub mod engine;
pub mod error;
pub mod events;
pub mod periodic;
pub mod run_loop;
pub mod time;
pub mod timer;

#[cfg(test)]
mod sim;

pub use config::{NodeSchedule, RunLoopConfig, SchedulerConfig, TaskSchedule};
pub use engine::Scheduler;
pub use error::SchedError;
pub use events::{EventSet, InterruptEvents};
pub use periodic::{PeriodicTask, TimeBase};
pub use run_loop::{Cycle, LoopState, RunLoop, Subsystem};
pub use timer::{Alignment, Callback, Mode, TimerId, TimerOptions};
