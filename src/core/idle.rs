//! Idle task
//!
//! Runs at the lowest priority whenever nothing else is ready. Each pass
//! reaps one self-deleted task, optionally yields to other priority-0
//! tasks and, with tickless idle, sleeps through quiet periods.

use crate::core::kernel::Kernel;
use crate::core::list::LinkKind;
use crate::types::TickType;

/// Work the idle loop must do after one [`Kernel::idle_step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleStep {
    pub hook: Option<fn()>,
    /// Ticks the port may sleep for
    pub sleep: Option<TickType>,
}

impl Kernel {
    /// One pass of the idle loop, run inside the kernel lock
    pub fn idle_step(&mut self) -> IdleStep {
        if let Some(idx) = self.terminated.pop_front(&mut self.tasks, LinkKind::State) {
            self.free_task(idx);
            crate::debug!("reaped task {=u8}", idx);
        }

        let idle_prio = crate::config::CFG_IDLE_TASK_PRIORITY;
        if self.config.preemption && self.config.idle_should_yield && self.ready.band_len(idle_prio) > 1 {
            self.request_switch();
        }

        let mut sleep = None;
        if self.config.tickless_idle {
            let expected = self.expected_idle_time();
            if expected >= self.config.expected_idle_time_before_sleep {
                sleep = Some(expected);
            }
        }
        IdleStep {
            hook: self.hooks.idle,
            sleep,
        }
    }

    /// Tasks deleted but not yet reaped
    #[inline]
    pub fn tasks_awaiting_cleanup(&self) -> usize {
        self.terminated.len()
    }
}

/// Idle task entry
pub(crate) fn idle_task(_arg: *mut ()) -> ! {
    use crate::core::kernel::with_kernel;

    loop {
        let step = with_kernel(|k| k.idle_step());
        if let Some(hook) = step.hook {
            hook();
        }
        if let Some(expected) = step.sleep {
            sleep_through(expected);
        }
    }
}

/// Stop the tick, sleep, and account for the ticks that passed
fn sleep_through(expected: TickType) {
    use crate::core::kernel::with_kernel;
    use crate::time::SleepMode;

    with_kernel(|k| k.suspend_all());
    let mode = with_kernel(|k| {
        // Re-check now that nothing can be scheduled in
        if k.expected_idle_time() >= k.config.expected_idle_time_before_sleep {
            k.confirm_sleep_mode()
        } else {
            SleepMode::Abort
        }
    });
    if mode != SleepMode::Abort {
        let slept = crate::port::suppress_ticks_and_sleep(expected, mode);
        with_kernel(|k| {
            k.step_tick(slept);
        });
    }
    // Only fails if the suspend above was not counted
    let _ = with_kernel(|k| k.resume_all());
}
