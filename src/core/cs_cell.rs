//! Critical section protected cell
//!
//! Holds state that interrupt handlers and tasks share; access requires a
//! live [`CriticalSection`] token.

use core::cell::UnsafeCell;
use crate::critical::CriticalSection;

/// A cell that can only be accessed within a critical section.
pub struct CsCell<T>(UnsafeCell<T>);

unsafe impl<T> Sync for CsCell<T> {}

impl<T> CsCell<T> {
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Borrow the inner value for the duration of the critical section
    ///
    /// Callers must not hold two borrows obtained from nested sections.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub fn get<'cs>(&self, _cs: &'cs CriticalSection) -> &'cs mut T {
        unsafe { &mut *self.0.get() }
    }

    /// Raw pointer for code that runs with interrupts already masked
    #[inline(always)]
    pub const fn as_ptr(&self) -> *mut T {
        self.0.get()
    }
}
