//! Processor power-state seam

/// Low-power wait primitives
///
/// `pending` reports whether work was queued by an interrupt handler. Boards
/// must evaluate it with interrupts masked and only then wait, so an
/// interrupt landing between the check and the wait still wakes the core.
pub trait PowerControl {
    /// Light sleep until the next interrupt of any kind
    fn wait_for_interrupt(&mut self, pending: &dyn Fn() -> bool);

    /// Lowest-power wait; exited only by an interrupt (alarm or line)
    fn deep_sleep(&mut self, pending: &dyn Fn() -> bool);

    /// Persist any buffered durable state before deep sleep
    fn flush(&mut self) {}
}
