//! Time management module
//!
//! Tick processing, delayed lists, timeouts and tickless-idle support.

use crate::core::kernel::{with_kernel, with_kernel_from_isr, Kernel, FLAGS};
use crate::core::list::{Container, LinkKind};
use crate::error::{KernelError, KernelResult};
use crate::types::{TickType, WakeReason, MAX_DELAY};

/// Timeout state of one blocking call
///
/// A call that returns [`Step::Blocked`](crate::types::Step) must be
/// repeated with the same `Wait` so the remaining time carries over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    ticks: TickType,
    remaining: TickType,
    entered_at: TickType,
    entered_overflow: u32,
    started: bool,
}

impl Wait {
    /// Fail at once instead of blocking
    pub const NONE: Self = Self::new(0);
    /// Block until the event occurs
    pub const FOREVER: Self = Self::new(MAX_DELAY);

    pub const fn new(ticks: TickType) -> Self {
        Wait {
            ticks,
            remaining: ticks,
            entered_at: 0,
            entered_overflow: 0,
            started: false,
        }
    }

    /// Ticks still allowed
    #[inline]
    pub fn remaining(&self) -> TickType {
        self.remaining
    }

    /// The call has blocked at least once
    #[inline]
    pub fn started(&self) -> bool {
        self.started
    }
}

/// Verdict of [`Kernel::confirm_sleep_mode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum SleepMode {
    /// Something became ready; do not sleep
    Abort,
    /// Sleep until the next unblock time
    Standard,
    /// Every other task waits without timeout; sleep may be indefinite
    NoTasksWaitingTimeout,
}

impl Kernel {
    // ============ Timeouts ============

    fn begin_wait(&self, wait: &mut Wait) {
        wait.entered_at = self.tick;
        wait.entered_overflow = self.overflow_count;
        wait.started = true;
    }

    /// Charge elapsed time against `wait`; true once it has run out
    fn wait_expired(&mut self, wait: &mut Wait) -> bool {
        if let Some(cur) = self.current {
            if self.tasks.tcb(cur).wake_reason == WakeReason::Aborted {
                self.tasks.tcb_mut(cur).wake_reason = WakeReason::None;
                wait.remaining = 0;
                return true;
            }
        }
        if wait.ticks == MAX_DELAY {
            return false;
        }
        let now = self.tick;
        if self.overflow_count != wait.entered_overflow && now >= wait.entered_at {
            // Counter wrapped and passed the entry tick again
            wait.remaining = 0;
            return true;
        }
        let elapsed = now.wrapping_sub(wait.entered_at);
        if elapsed < wait.remaining {
            wait.remaining -= elapsed;
            self.begin_wait(wait);
            false
        } else {
            wait.remaining = 0;
            true
        }
    }

    /// Decide whether the caller may block and for how long
    ///
    /// # Returns
    /// * `Ok(ticks)` - Block for `ticks` (`MAX_DELAY` = forever)
    /// * `Err(KernelError::WouldBlock)` - Zero timeout
    /// * `Err(KernelError::Timeout)` - Time ran out on a retry
    /// * `Err(KernelError::SchedulerSuspended)` - Blocking is not allowed now
    pub(crate) fn prepare_block(&mut self, wait: &mut Wait) -> KernelResult<TickType> {
        if wait.ticks == 0 {
            return Err(KernelError::WouldBlock);
        }
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        if !self.running {
            return Err(KernelError::SchedulerNotRunning);
        }
        if self.suspend_depth > 0 {
            return Err(KernelError::SchedulerSuspended);
        }
        if !wait.started {
            self.begin_wait(wait);
            return Ok(wait.remaining);
        }
        if self.wait_expired(wait) {
            return Err(KernelError::Timeout);
        }
        Ok(wait.remaining)
    }

    /// Park the caller, optionally on a queue wait list
    pub(crate) fn block_current_on(&mut self, waiting: Option<(u8, bool)>, ticks: TickType) -> KernelResult<()> {
        let cur = self.current_index()?;
        if let Some((queue, sending)) = waiting {
            let key = Self::wait_key(self.tasks.tcb(cur).priority);
            self.queues.slots[queue as usize].waiters_mut(sending).insert_ordered(
                &mut self.tasks,
                cur,
                LinkKind::Event,
                Container::Waiting { queue, sending },
                key,
            );
        }
        self.add_current_to_delayed(ticks, true)?;
        self.request_switch();
        Ok(())
    }

    /// Move the caller from the ready set onto a delayed list
    ///
    /// `MAX_DELAY` with `indefinite` parks it on the suspended list.
    pub(crate) fn add_current_to_delayed(&mut self, ticks: TickType, indefinite: bool) -> KernelResult<()> {
        let cur = self.current_index()?;
        self.tasks.tcb_mut(cur).wake_reason = WakeReason::None;
        self.unlink_state(cur);

        if ticks == MAX_DELAY && indefinite {
            self.suspended
                .push_back(&mut self.tasks, cur, LinkKind::State, Container::Suspended);
            return Ok(());
        }

        let now = self.tick;
        let wake = now.wrapping_add(ticks);
        let (list, container) = if wake < now {
            let other = self.delayed_cur ^ 1;
            (other, Container::Delayed(other))
        } else {
            (self.delayed_cur, Container::Delayed(self.delayed_cur))
        };
        self.delayed[list as usize].insert_ordered(&mut self.tasks, cur, LinkKind::State, container, wake as u32);
        if list == self.delayed_cur && wake < self.next_unblock {
            self.next_unblock = wake;
        }
        Ok(())
    }

    /// Recompute the earliest wake tick from the live delayed list
    pub(crate) fn reset_next_unblock(&mut self) {
        self.next_unblock = self.delayed[self.delayed_cur as usize]
            .head_value(&self.tasks, LinkKind::State)
            .map_or(MAX_DELAY, |v| v as TickType);
    }

    fn switch_delayed_lists(&mut self) {
        crate::kernel_assert!(self, self.delayed[self.delayed_cur as usize].is_empty());
        self.delayed_cur ^= 1;
        self.overflow_count = self.overflow_count.wrapping_add(1);
        self.reset_next_unblock();
    }

    // ============ Tick ============

    /// Advance time by one tick
    ///
    /// Wakes expired waits and applies time slicing. Returns true when a
    /// context switch is due.
    pub fn tick(&mut self) -> bool {
        if !self.running {
            return false;
        }
        if self.suspend_depth > 0 {
            self.pended_ticks = self.pended_ticks.wrapping_add(1);
            return false;
        }

        let mut switch = false;
        self.tick = self.tick.wrapping_add(1);
        FLAGS.set_tick(self.tick);
        if self.tick == 0 {
            self.switch_delayed_lists();
        }

        if self.tick >= self.next_unblock {
            let list = self.delayed_cur as usize;
            loop {
                let Some(head) = self.delayed[list].head() else {
                    self.next_unblock = MAX_DELAY;
                    break;
                };
                let wake = self.tasks.tcb(head).state_link.value as TickType;
                if wake > self.tick {
                    self.next_unblock = wake;
                    break;
                }
                self.delayed[list].remove(&mut self.tasks, head, LinkKind::State);
                self.unlink_event(head);
                self.tasks.tcb_mut(head).wake_reason = WakeReason::Timeout;
                self.add_to_ready(head);
                if self.config.preemption && self.tasks.tcb(head).priority > self.current_priority() {
                    switch = true;
                }
            }
        }

        if self.config.preemption && self.config.time_slicing {
            if let Some(cur) = self.current {
                if let Some(Container::Ready(prio)) = self.tasks.tcb(cur).state_link.container {
                    if self.ready.band_len(prio) > 1 {
                        switch = true;
                    }
                }
            }
        }

        if self.yield_pending && self.config.preemption {
            switch = true;
        }
        switch
    }

    /// Body of one SysTick interrupt
    ///
    /// Returns the tick hook to run once the kernel lock is dropped. The
    /// hook runs on every tick of a started kernel, pended ticks included.
    pub fn tick_interrupt(&mut self) -> Option<fn()> {
        if self.tick() {
            self.request_switch();
        }
        if self.running {
            self.hooks.tick
        } else {
            None
        }
    }

    #[inline]
    pub fn tick_count(&self) -> TickType {
        self.tick
    }

    /// Times the tick counter has wrapped
    #[inline]
    pub fn overflow_count(&self) -> u32 {
        self.overflow_count
    }

    // ============ Delays ============

    /// Block the caller for `ticks` ticks; zero yields
    pub fn delay(&mut self, ticks: TickType) -> KernelResult<()> {
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        self.current_index()?;
        if ticks == 0 {
            self.request_switch();
            return Ok(());
        }
        if self.suspend_depth > 0 {
            return Err(KernelError::SchedulerSuspended);
        }
        self.add_current_to_delayed(ticks, false)?;
        self.request_switch();
        Ok(())
    }

    /// Block until `*previous + increment`, then advance `*previous`
    ///
    /// Returns false when the wake time had already passed and the caller
    /// was not delayed.
    pub fn delay_until(&mut self, previous: &mut TickType, increment: TickType) -> KernelResult<bool> {
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        if increment == 0 {
            return Err(KernelError::InvalidArgument);
        }
        self.current_index()?;
        if self.suspend_depth > 0 {
            return Err(KernelError::SchedulerSuspended);
        }

        let now = self.tick;
        let wake = previous.wrapping_add(increment);
        let should_delay = if now < *previous {
            // Counter wrapped since `previous`
            wake < *previous && wake > now
        } else {
            wake < *previous || wake > now
        };
        *previous = wake;

        if should_delay {
            self.add_current_to_delayed(wake.wrapping_sub(now), false)?;
        }
        self.request_switch();
        Ok(should_delay)
    }

    // ============ Tickless idle ============

    /// Ticks the idle task may sleep before something has to run
    pub fn expected_idle_time(&self) -> TickType {
        let idle_prio = crate::config::CFG_IDLE_TASK_PRIORITY;
        if self.current_priority() > idle_prio {
            return 0;
        }
        if self.ready.band_len(idle_prio) > 1 {
            return 0;
        }
        self.next_unblock.wrapping_sub(self.tick)
    }

    /// Account for `ticks` ticks slept through with SysTick stopped
    ///
    /// The step is clamped to the next unblock time; reaching it runs a
    /// normal tick. Returns true when a context switch is due.
    pub fn step_tick(&mut self, ticks: TickType) -> bool {
        if ticks == 0 {
            return false;
        }
        let until_unblock = self.next_unblock.wrapping_sub(self.tick);
        crate::kernel_assert!(self, ticks <= until_unblock);
        let ticks = ticks.min(until_unblock);
        if ticks == 0 {
            return false;
        }
        if ticks == until_unblock {
            self.tick = self.tick.wrapping_add(ticks - 1);
            self.tick()
        } else {
            self.tick = self.tick.wrapping_add(ticks);
            FLAGS.set_tick(self.tick);
            false
        }
    }

    /// Last check before the port stops the tick and sleeps
    ///
    /// Called with the scheduler suspended.
    pub fn confirm_sleep_mode(&self) -> SleepMode {
        if !self.pending_ready.is_empty() || self.yield_pending || self.pended_ticks > 0 {
            return SleepMode::Abort;
        }
        // Everything but the idle task parked with no timeout
        if self.suspended.len() == self.task_count.saturating_sub(1) {
            SleepMode::NoTasksWaitingTimeout
        } else {
            SleepMode::Standard
        }
    }
}

// ============ Public API ============

/// Delay the calling task by `ticks` system ticks
pub fn os_delay(ticks: TickType) -> KernelResult<()> {
    with_kernel(|k| k.delay(ticks))
}

/// Delay the calling task by at least `ms` milliseconds
pub fn os_delay_ms(ms: u32) -> KernelResult<()> {
    with_kernel(|k| {
        let ticks = k.config.ms_to_ticks(ms);
        k.delay(ticks)
    })
}

/// Periodic delay anchored at `*previous`
pub fn os_delay_until(previous: &mut TickType, increment: TickType) -> KernelResult<bool> {
    with_kernel(|k| k.delay_until(previous, increment))
}

/// Current tick count
pub fn os_tick_count() -> TickType {
    with_kernel(|k| k.tick_count())
}

/// Tick count from an interrupt handler
pub fn os_tick_count_from_isr() -> TickType {
    with_kernel_from_isr(|k| k.tick_count())
}

/// Body of the SysTick handler
///
/// The tick hook runs after the kernel lock is released.
pub fn os_tick_handler() {
    let hook = with_kernel_from_isr(|k| k.tick_interrupt());
    if let Some(hook) = hook {
        hook();
    }
}
