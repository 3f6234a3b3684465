#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;

use embassy_stm32::peripherals;
use embassy_stm32::rng::Rng;
use node_core::{InterruptEvents, Scheduler};
use static_cell::StaticCell;

mod clock;
mod power;
mod subsystems;

use clock::RtcClock;

/// Timer slots: run loop wake + settle, heartbeat, and headroom
const TIMER_SLOTS: usize = 8;

/// Heartbeat blink period in seconds
const HEARTBEAT_SECS: u32 = 5;

type NodeScheduler =
    Scheduler<'static, RtcClock, Rng<'static, peripherals::RNG>, TIMER_SLOTS>;

static SCHEDULER: StaticCell<NodeScheduler> = StaticCell::new();

/// Line interrupts recorded for the run loop
static EVENTS: InterruptEvents = InterruptEvents::new();

// RNG interrupt binding for hardware random number generator
embassy_stm32::bind_interrupts!(struct RngIrqs {
    RNG => embassy_stm32::rng::InterruptHandler<peripherals::RNG>;
});

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1])]
mod app {
    use super::*;
    use defmt::{info, unwrap};
    use embassy_stm32::exti::ExtiInput;
    use embassy_stm32::gpio::{Level, Output, Pull, Speed};
    use embassy_stm32::rcc::{Hse, HseMode, LsConfig, LseConfig, LseMode};
    use embassy_stm32::rtc::{Rtc, RtcConfig};
    use embassy_stm32::time::Hertz;
    use hal_abstractions::Domain;
    use node_core::{
        NodeSchedule, PeriodicTask, RunLoop, RunLoopConfig, SchedulerConfig, Subsystem,
        TimerOptions,
    };

    use crate::power::WfiPower;
    use crate::subsystems::{request_blink, Heartbeat, Sampler, ScheduledJob, ALERT_LINE};

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        alarm_sched: &'static NodeScheduler,
        loop_sched: &'static NodeScheduler,
        led: Output<'static>,
        alert: ExtiInput<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Sensor node starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE, 32.768 kHz LSE (PC14/PC15)
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        // VCO / DIVQ(7) = 48 MHz (RNG clock)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        config.rcc.ls = LsConfig {
            rtc: embassy_stm32::rcc::RtcClockSource::LSE,
            lsi: false,
            lse: Some(LseConfig {
                frequency: Hertz(32_768),
                mode: LseMode::Oscillator(embassy_stm32::rcc::LseDrive::MediumHigh),
            }),
        };

        let p = embassy_stm32::init(config);
        info!("System initialized with HSE (12MHz) and LSE (32.768kHz)");

        let rtc = Rtc::new(p.RTC, RtcConfig::default());
        let clock = RtcClock::new(rtc);
        let rng = Rng::new(p.RNG, RngIrqs);

        // Clock must be running before any timer or periodic task exists
        let sched: &'static NodeScheduler =
            SCHEDULER.init(Scheduler::new(clock, rng, SchedulerConfig::default()));

        let led = Output::new(p.PC1, Level::High, Speed::Low);
        let alert = ExtiInput::new(p.PC2, p.EXTI2, Pull::Up);

        alert_line::spawn().ok();

        (
            Shared {},
            Local {
                alarm_sched: sched,
                loop_sched: sched,
                led,
                alert,
            },
        )
    }

    /// RTC wakeup timer: move expired timers to the deferred queue
    #[task(binds = RTC_WKUP, priority = 2, local = [alarm_sched])]
    fn rtc_wakeup(cx: rtc_wakeup::Context) {
        RtcClock::acknowledge_wakeup();
        for domain in Domain::ALL {
            cx.local.alarm_sched.on_alarm(domain);
        }
    }

    /// Sensor alert input, active low
    #[task(priority = 1, local = [alert])]
    async fn alert_line(cx: alert_line::Context) {
        loop {
            cx.local.alert.wait_for_falling_edge().await;
            EVENTS.raise(ALERT_LINE);
        }
    }

    /// Run loop: drain, settle, sleep until the next deadline
    #[idle(local = [loop_sched, led])]
    fn idle(cx: idle::Context) -> ! {
        let sched: &'static NodeScheduler = *cx.local.loop_sched;
        let schedule = NodeSchedule::default();

        let blink = unwrap!(sched.create_timer(
            TimerOptions::periodic(Domain::Seconds).absolute(),
            HEARTBEAT_SECS,
            Some(&request_blink),
        ));
        sched.start(blink);

        let mut heartbeat = Heartbeat::new(cx.local.led);
        let mut sampler = Sampler::new(PeriodicTask::new(sched), schedule.sample);
        let mut uplink = ScheduledJob::new("uplink", PeriodicTask::new(sched), schedule.transmit);
        let mut gps = ScheduledJob::new("gps", PeriodicTask::new(sched), schedule.gps);
        let mut beacon = ScheduledJob::new("beacon", PeriodicTask::new(sched), schedule.beacon);

        let mut run_loop = unwrap!(RunLoop::new(
            sched,
            &EVENTS,
            WfiPower,
            RunLoopConfig::default()
        ));
        info!("Entering run loop");

        let mut subsystems: [&mut dyn Subsystem; 5] = [
            &mut heartbeat,
            &mut sampler,
            &mut uplink,
            &mut gps,
            &mut beacon,
        ];
        run_loop.run(&mut subsystems)
    }
}
