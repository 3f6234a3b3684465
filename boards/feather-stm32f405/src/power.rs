//! WFI-based power control

use hal_abstractions::PowerControl;

/// Sleeps the core with WFI
///
/// The pending check runs with interrupts masked; WFI still wakes on an
/// interrupt that becomes pending while masked, and the handler runs as soon
/// as the mask is lifted.
pub struct WfiPower;

impl WfiPower {
    fn sleep_unless_pending(pending: &dyn Fn() -> bool) {
        cortex_m::interrupt::free(|_| {
            if !pending() {
                cortex_m::asm::wfi();
            }
        });
    }
}

impl PowerControl for WfiPower {
    fn wait_for_interrupt(&mut self, pending: &dyn Fn() -> bool) {
        Self::sleep_unless_pending(pending);
    }

    fn deep_sleep(&mut self, pending: &dyn Fn() -> bool) {
        // TODO: enter STOP mode once the PLL is restored on wake-up
        Self::sleep_unless_pending(pending);
    }
}
