//! Host harness shared by the integration tests
//!
//! Each test owns its own [`Kernel`]. Nothing switches stacks on the host:
//! the test body plays whichever task [`Kernel::current_task`] names, and
//! pending switches are applied with [`Kernel::run_pending_switch`].

#![allow(dead_code)]

use rtkernel::{Kernel, KernelConfig, Priority, TaskHandle};

pub const ARENA_BYTES: usize = 32 * 1024;

/// Leak a zeroed arena for one kernel
pub fn arena(bytes: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; bytes].into_boxed_slice())
}

pub fn kernel() -> Kernel {
    kernel_with(KernelConfig::DEFAULT)
}

pub fn kernel_with(config: KernelConfig) -> Kernel {
    Kernel::new(config, arena(ARENA_BYTES)).unwrap()
}

/// Task body for tasks that only exist as scheduler entries
pub fn spin(_arg: *mut ()) -> ! {
    loop {
        std::hint::spin_loop();
    }
}

pub fn spawn(k: &mut Kernel, name: &str, prio: Priority) -> TaskHandle {
    k.create_task(spin, name, 128, std::ptr::null_mut(), prio).unwrap()
}

/// Start the scheduler and let system tasks park themselves
pub fn start(k: &mut Kernel) {
    k.start_scheduler().unwrap();
    settle(k);
}

/// Apply pending switches, running the timer daemon whenever it is selected
///
/// Returns the number of timer callbacks executed.
pub fn settle(k: &mut Kernel) -> usize {
    let mut callbacks = 0;
    loop {
        k.run_pending_switch();
        #[cfg(feature = "timers")]
        if k.current_task().is_some() && k.current_task() == k.timer_daemon_handle() {
            let step = k.timer_daemon_step().unwrap();
            if matches!(step, rtkernel::timer::DaemonStep::Expired(..)) {
                callbacks += 1;
            }
            step.run();
            continue;
        }
        return callbacks;
    }
}

/// One SysTick followed by whatever switch it asked for
pub fn tick(k: &mut Kernel) -> usize {
    if k.tick() {
        k.request_switch();
    }
    settle(k)
}

/// Run `n` ticks; returns the timer callbacks executed on the way
pub fn advance(k: &mut Kernel, n: usize) -> usize {
    (0..n).map(|_| tick(k)).sum()
}

pub fn current(k: &Kernel) -> TaskHandle {
    k.current_task().unwrap()
}
