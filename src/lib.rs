//! rtkernel: a preemptive fixed-priority real-time kernel in Rust
//!
//! - Priority-based preemptive scheduling with optional time slicing
//! - Queues, semaphores, mutexes with priority inheritance and queue sets
//! - Direct-to-task notifications
//! - Software timers run by a daemon task
//! - Tick-based delays and tickless idle
//! - Context switching for ARM Cortex-M4
//!
//! All kernel state lives in one [`Kernel`] guarded by a critical section.
//! The `os_*` functions operate on the global instance; the methods on
//! [`Kernel`] work on any instance, which is how the host tests drive it.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod mem;
pub mod sync;
#[cfg(feature = "timers")]
pub mod timer;
pub mod port;

// ============ Re-exports ============

pub use self::core::config;
pub use self::core::config::*;
pub use self::core::critical;
pub use self::core::error;
pub use self::core::error::{KernelError, KernelResult};
pub use self::core::hooks;
pub use self::core::hooks::Hooks;
pub use self::core::idle;
pub use self::core::kernel;
pub use self::core::kernel::{
    block_on, os_init, os_init_with, os_resume_all, os_scheduler_state, os_start, os_suspend_all, with_kernel,
    with_kernel_from_isr, Kernel,
};
pub use self::core::prio;
pub use self::core::sched;
pub use self::core::task;
pub use self::core::task::{os_task_create, os_task_delete};
pub use self::core::time;
pub use self::core::time::{os_delay, os_delay_until, Wait};
pub use self::core::types;
pub use self::core::types::*;

pub use self::sync::{Queue, QueueKind};

#[cfg(feature = "sem")]
pub use self::sync::sem;
#[cfg(feature = "sem")]
pub use self::sync::Semaphore;

#[cfg(feature = "mutex")]
pub use self::sync::mutex;
#[cfg(feature = "mutex")]
pub use self::sync::Mutex;
#[cfg(feature = "recursive-mutex")]
pub use self::sync::RecursiveMutex;

#[cfg(feature = "queue-sets")]
pub use self::sync::QueueSet;

#[cfg(feature = "timers")]
pub use self::timer::Timer;

#[cfg(feature = "pac")]
pub use stm32_metapac as pac;
