//! Timer daemon
//!
//! [`Kernel::timer_daemon_step`] does one unit of daemon work inside the
//! kernel lock and hands back whatever must run outside it (a callback,
//! a pended function or the startup hook).

use super::TimerCommand;
use crate::core::kernel::{with_kernel, Kernel};
use crate::core::list::{Container, LinkKind};
use crate::error::KernelError;
use crate::time::Wait;
use crate::types::{PendedFn, Step, TickType, TimerCallback, TimerHandle, MAX_DELAY};

/// Work produced by one daemon step
#[derive(Debug, Clone, Copy)]
pub enum DaemonStep {
    /// Run the daemon-startup hook
    Startup(fn()),
    /// A timer expired; run its callback
    Expired(TimerCallback, TimerHandle),
    PendedCall(PendedFn, *mut (), u32),
    /// A command was applied; step again
    Continue,
    /// Nothing to do; the daemon is parked on its command queue
    Blocked,
}

impl DaemonStep {
    /// Execute the deferred part of the step
    pub fn run(self) {
        match self {
            DaemonStep::Startup(hook) => hook(),
            DaemonStep::Expired(callback, timer) => callback(timer),
            DaemonStep::PendedCall(func, param, value) => func(param, value),
            DaemonStep::Continue | DaemonStep::Blocked => {}
        }
    }
}

impl Kernel {
    /// Current tick as seen by the daemon; notices counter wraps
    fn timer_sample_time(&mut self) -> TickType {
        let now = self.tick;
        if now < self.timers.last_time {
            self.timers.draining = true;
        }
        self.timers.last_time = now;
        now
    }

    fn unlink_timer(&mut self, idx: u8) {
        if let Some(Container::Delayed(list)) = self.timers.table.slots[idx as usize].link.container {
            self.timers.lists[list as usize].remove(&mut self.timers.table, idx, LinkKind::State);
        }
    }

    /// Put a timer on an active list, due `period` ticks after `base`
    fn arm_timer(&mut self, idx: u8, base: TickType, now: TickType) {
        let period = self.timers.table.slots[idx as usize].period;
        let mut expiry = base.wrapping_add(period);
        let wrapped = expiry < base;
        let cur = self.timers.cur;
        let list = if base > now && !self.timers.draining {
            // Issued before the last wrap: unless it wrapped too, it is overdue
            if !wrapped {
                expiry = now;
            }
            cur
        } else if wrapped {
            cur ^ 1
        } else {
            cur
        };
        self.timers.lists[list as usize].insert_ordered(
            &mut self.timers.table,
            idx,
            LinkKind::State,
            Container::Delayed(list),
            expiry as u32,
        );
        self.timers.table.slots[idx as usize].active = true;
    }

    /// Take an expired timer off its list and re-arm it if periodic
    fn expire_timer(&mut self, idx: u8, expiry: TickType, now: TickType) -> DaemonStep {
        self.unlink_timer(idx);
        let cb = &mut self.timers.table.slots[idx as usize];
        if cb.auto_reload {
            // Re-armed from the nominal expiry so missed periods are
            // each delivered on the following steps
            self.arm_timer(idx, expiry, now);
        } else {
            cb.active = false;
        }
        match self.timers.table.slots[idx as usize].callback {
            Some(callback) => DaemonStep::Expired(callback, TimerHandle(idx)),
            None => DaemonStep::Continue,
        }
    }

    fn apply_command(&mut self, cmd: TimerCommand, now: TickType) -> DaemonStep {
        let live = |k: &Kernel, t: u8| k.timers.table.slots.get(t as usize).is_some_and(|cb| cb.in_use);
        match cmd {
            TimerCommand::Start { timer, at } | TimerCommand::Reset { timer, at } if live(self, timer) => {
                self.unlink_timer(timer);
                self.arm_timer(timer, at, now);
            }
            TimerCommand::ChangePeriod { timer, period, at } if live(self, timer) => {
                self.unlink_timer(timer);
                self.timers.table.slots[timer as usize].period = period;
                self.arm_timer(timer, at, now);
            }
            TimerCommand::Stop { timer } if live(self, timer) => {
                self.unlink_timer(timer);
                self.timers.table.slots[timer as usize].active = false;
            }
            TimerCommand::Delete { timer } if live(self, timer) => {
                self.unlink_timer(timer);
                self.timers.table.slots[timer as usize] = super::TimerCb::EMPTY;
            }
            TimerCommand::PendCall { func, param, value } => return DaemonStep::PendedCall(func, param, value),
            // Command for a timer deleted in the meantime
            _ => {}
        }
        DaemonStep::Continue
    }

    /// One unit of daemon work
    ///
    /// Order: startup hook, timers left over from before a tick wrap,
    /// due timers, queued commands. With nothing to do the daemon blocks
    /// on its queue until the next expiry (or forever).
    pub fn timer_daemon_step(&mut self) -> Result<DaemonStep, KernelError> {
        if !self.timers.startup_done {
            self.timers.startup_done = true;
            if let Some(hook) = self.hooks.daemon_startup {
                return Ok(DaemonStep::Startup(hook));
            }
        }

        let now = self.timer_sample_time();
        let cur = self.timers.cur as usize;
        let head = self.timers.lists[cur].head();

        if self.timers.draining {
            match head {
                Some(idx) => {
                    let expiry = self.timers.table.slots[idx as usize].link.value as TickType;
                    return Ok(self.expire_timer(idx, expiry, now));
                }
                None => {
                    self.timers.cur ^= 1;
                    self.timers.draining = false;
                    return Ok(DaemonStep::Continue);
                }
            }
        }

        if let Some(idx) = head {
            let expiry = self.timers.table.slots[idx as usize].link.value as TickType;
            if expiry <= now {
                return Ok(self.expire_timer(idx, expiry, now));
            }
        }

        let block_for = match head {
            Some(idx) => (self.timers.table.slots[idx as usize].link.value as TickType).wrapping_sub(now),
            // Only wrapped timers remain: wake at the wrap
            None if !self.timers.lists[cur ^ 1].is_empty() => (0 as TickType).wrapping_sub(now),
            None => MAX_DELAY,
        };
        let mut wait = Wait::new(block_for);
        match self.next_command(&mut wait) {
            Ok(Step::Done(cmd)) => Ok(self.apply_command(cmd, now)),
            Ok(Step::Blocked) => Ok(DaemonStep::Blocked),
            Err(KernelError::WouldBlock) | Err(KernelError::Timeout) => Ok(DaemonStep::Continue),
            Err(e) => Err(e),
        }
    }
}

/// Timer daemon task entry
pub(crate) fn timer_daemon_task(_arg: *mut ()) -> ! {
    loop {
        match with_kernel(|k| k.timer_daemon_step()) {
            Ok(step) => step.run(),
            Err(_e) => crate::error!("timer daemon step failed"),
        }
    }
}
