//! Application hook slots
//!
//! Each hook is an optional function pointer installed before the
//! scheduler starts. An empty slot disables the hook.

use crate::types::TaskHandle;

/// Hook table consulted by the kernel
#[derive(Clone, Copy, Default)]
pub struct Hooks {
    /// Called on every idle iteration, outside the critical section
    pub idle: Option<fn()>,
    /// Called from the tick interrupt
    pub tick: Option<fn()>,
    /// Called when the heap cannot satisfy a request of the given size
    pub malloc_failed: Option<fn(usize)>,
    /// Called when a switched-out task has overrun its stack
    pub stack_overflow: Option<fn(TaskHandle, &str)>,
    /// Called with file and line when a kernel assertion fails
    pub assert_failed: Option<fn(&'static str, u32)>,
    /// Called once by the timer daemon before it processes commands
    pub daemon_startup: Option<fn()>,
    /// Free-running counter used for run-time statistics
    pub run_time_counter: Option<fn() -> u32>,
}

impl Hooks {
    pub const NONE: Self = Self {
        idle: None,
        tick: None,
        malloc_failed: None,
        stack_overflow: None,
        assert_failed: None,
        daemon_startup: None,
        run_time_counter: None,
    };
}

/// Kernel assertion routed to the `assert_failed` hook
///
/// Without a hook the failure panics.
#[macro_export]
macro_rules! kernel_assert {
    ($kernel:expr, $cond:expr) => {
        if !$cond {
            $kernel.assert_failed(::core::file!(), ::core::line!());
        }
    };
}
