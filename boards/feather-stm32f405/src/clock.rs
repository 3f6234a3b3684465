//! RTC-backed clock source
//!
//! The STM32F405 RTC runs from the 32.768 kHz LSE with the default
//! prescalers (async 128, sync 256), so the sub-second register counts down
//! at 256 Hz. That gives the ticks domain for free:
//!
//! ```text
//! ticks = seconds_since_2000 << 8 | (255 - SSR)
//! ```
//!
//! The RTC has a single wakeup timer, so both domains share it: each domain
//! keeps its alarm as an absolute tick count and the wakeup timer is loaded
//! with whichever comes first. Short alarms count RTCCLK/16 (8 counts per
//! tick); longer ones count whole seconds and may fire early, which the
//! scheduler absorbs by re-arming for the remainder.

use core::cell::Cell;

use defmt::{error, info};
use embassy_stm32::pac;
use embassy_stm32::pac::rtc::vals::Wucksel;
use embassy_stm32::rtc::{DateTime, DayOfWeek, Rtc};
use hal_abstractions::{ClockSource, Domain};
use node_core::calendar::CivilDateTime;
use node_core::time;

const TICK_SHIFT: u32 = 8;

/// Synchronous prescaler reload, SSR counts down from here
const PREDIV_S: u32 = 255;

/// Longest alarm the RTCCLK/16 wakeup clock can express
const MAX_FINE_TICKS: u32 = 8192;

/// RTC wakeup is routed through EXTI line 22
const WAKEUP_EXTI_LINE: usize = 22;

/// Which wakeup clock a programmed alarm counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
enum WakeupReload {
    /// RTCCLK/16, 8 counts per tick
    Fine(u16),
    /// ck_spre, one count per second
    Coarse(u16),
}

impl WakeupReload {
    fn for_ticks(ticks: u32) -> Self {
        let ticks = ticks.max(1);
        if ticks <= MAX_FINE_TICKS {
            WakeupReload::Fine((ticks * 8 - 1) as u16)
        } else {
            let secs = (ticks >> TICK_SHIFT).clamp(1, 1 << 16);
            WakeupReload::Coarse((secs - 1) as u16)
        }
    }
}

pub struct RtcClock {
    rtc: Rtc,
    /// Last calendar reading that succeeded
    last_good: Cell<u32>,
    /// Absolute tick count of each domain's alarm
    alarms: [Option<u32>; 2],
}

impl RtcClock {
    /// Take over an initialised RTC and route its wakeup timer to the NVIC
    pub fn new(rtc: Rtc) -> Self {
        pac::EXTI
            .rtsr(0)
            .modify(|w| w.set_line(WAKEUP_EXTI_LINE, true));
        pac::EXTI
            .imr(0)
            .modify(|w| w.set_line(WAKEUP_EXTI_LINE, true));

        let clock = Self {
            rtc,
            last_good: Cell::new(0),
            alarms: [None; 2],
        };
        let now = clock.now_seconds();
        info!("RTC clock at {} ({})", now, CivilDateTime::from_epoch_secs(now));
        clock
    }

    /// Clear the wakeup flags; call first thing in the RTC_WKUP handler
    pub fn acknowledge_wakeup() {
        with_write_access(|rtc| rtc.isr().modify(|w| w.set_wutf(false)));
        pac::EXTI
            .pr(0)
            .write(|w| w.set_line(WAKEUP_EXTI_LINE, true));
    }

    fn read_seconds(&self) -> u32 {
        match self.rtc.now() {
            Ok(dt) => {
                let secs = CivilDateTime {
                    year: dt.year(),
                    month: dt.month(),
                    day: dt.day(),
                    hour: dt.hour(),
                    minute: dt.minute(),
                    second: dt.second(),
                }
                .to_epoch_secs();
                self.last_good.set(secs);
                secs
            }
            Err(_) => {
                error!("Failed to read RTC, using last good reading");
                self.last_good.get()
            }
        }
    }

    fn subsecond_ticks() -> u32 {
        PREDIV_S - (pac::RTC.ssr().read().ss() as u32).min(PREDIV_S)
    }

    /// Load the wakeup timer with the earliest pending alarm
    fn program(&mut self) {
        let now = self.now_ticks();
        let next = self
            .alarms
            .iter()
            .flatten()
            .map(|&at| time::until(now, at))
            .min();

        with_write_access(|rtc| {
            rtc.cr().modify(|w| w.set_wute(false));
            let Some(ticks) = next else {
                return;
            };
            while !rtc.isr().read().wutwf() {}

            let reload = WakeupReload::for_ticks(ticks);
            match reload {
                WakeupReload::Fine(count) => {
                    rtc.cr().modify(|w| w.set_wucksel(Wucksel::DIV16));
                    rtc.wutr().write(|w| w.set_wut(count));
                }
                WakeupReload::Coarse(count) => {
                    rtc.cr().modify(|w| w.set_wucksel(Wucksel::CLOCK_SPARE));
                    rtc.wutr().write(|w| w.set_wut(count));
                }
            }
            rtc.isr().modify(|w| w.set_wutf(false));
            rtc.cr().modify(|w| {
                w.set_wutie(true);
                w.set_wute(true);
            });
            defmt::trace!("wakeup in {} ticks ({})", ticks, reload);
        });
    }
}

/// Run `f` with the RTC register write protection lifted
fn with_write_access<R>(f: impl FnOnce(pac::rtc::Rtc) -> R) -> R {
    let rtc = pac::RTC;
    rtc.wpr().write(|w| w.set_key(0xca));
    rtc.wpr().write(|w| w.set_key(0x53));
    let result = f(rtc);
    rtc.wpr().write(|w| w.set_key(0xff));
    result
}

impl ClockSource for RtcClock {
    const TICK_SHIFT: u32 = TICK_SHIFT;

    fn now_ticks(&self) -> u32 {
        // SSR first: reading it freezes the calendar shadows until DR is read
        let fraction = Self::subsecond_ticks();
        (self.read_seconds() << TICK_SHIFT) | fraction
    }

    fn now_seconds(&self) -> u32 {
        self.read_seconds()
    }

    fn set_seconds(&mut self, secs: u32) {
        let civil = CivilDateTime::from_epoch_secs(secs);
        let datetime = DateTime::from(
            civil.year,
            civil.month,
            civil.day,
            DayOfWeek::Monday, // Not used for timekeeping
            civil.hour,
            civil.minute,
            civil.second,
            0,
        );
        match datetime.map(|dt| self.rtc.set_datetime(dt)) {
            Ok(Ok(())) => {
                self.last_good.set(secs);
                info!("RTC set to {}", civil);
            }
            _ => error!("Failed to set RTC to {}", civil),
        }
    }

    fn arm(&mut self, domain: Domain, duration: u32) {
        let now = self.now_ticks();
        let at = match domain {
            Domain::Ticks => now.wrapping_add(duration),
            Domain::Seconds => (now >> TICK_SHIFT).wrapping_add(duration) << TICK_SHIFT,
        };
        self.alarms[domain.index()] = Some(at);
        self.program();
    }

    fn cancel(&mut self, domain: Domain) {
        self.alarms[domain.index()] = None;
        self.program();
    }
}
