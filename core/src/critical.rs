//! Scoped critical sections around shared scheduler state
//!
//! Interrupt masking is delegated to the `critical-section` implementation
//! the board links in (`cortex-m`'s single-core implementation on target,
//! the `std` implementation on the host). Acquisition nests: an inner
//! section leaves the mask untouched and only the outermost exit restores
//! the state saved on entry.

use core::cell::RefCell;
use critical_section::Mutex;

/// State shared between thread mode and interrupt handlers
pub struct Shared<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> Shared<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Run `f` with interrupts masked and exclusive access to the state
    ///
    /// Panics if called re-entrantly on the same cell from inside `f`.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| {
            let mut state = self.inner.borrow(cs).borrow_mut();
            f(&mut state)
        })
    }
}
