//! Port layer - CPU-specific implementations
//!
//! Initial stack frames, PendSV context switching, SysTick and tickless
//! sleep for ARM Cortex-M4. Other targets get the host stub, which lets the
//! kernel run under `cargo test`.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::*;

// Stub implementations for non-ARM targets (for testing)
#[cfg(not(target_arch = "arm"))]
pub mod stub {
    use crate::time::SleepMode;
    use crate::types::{StackType, TaskFn, TickType};

    /// Host stacks hold no frame; the saved pointer is the stack top
    ///
    /// # Safety
    /// `base..base + depth` must be a valid stack owned by the new task.
    pub unsafe fn init_stack(base: *mut StackType, depth: usize, _entry: TaskFn, _arg: *mut ()) -> *mut StackType {
        unsafe { base.add(depth - 1) }
    }

    pub fn pend_context_switch() {
        // Tests call `Kernel::run_pending_switch` instead
    }

    pub fn setup_tick_interrupt(_reload: u32) {}

    pub fn start_first_task() {}

    /// The host "sleeps" for exactly the expected time
    pub fn suppress_ticks_and_sleep(expected: TickType, _mode: SleepMode) -> TickType {
        expected
    }

    /// Host tests never run in an interrupt
    pub fn active_interrupt_priority() -> Option<u8> {
        None
    }
}

#[cfg(not(target_arch = "arm"))]
pub use stub::*;
