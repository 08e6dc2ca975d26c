//! Scheduler
//!
//! Ready-set bookkeeping, list membership changes, priority changes
//! (including mutex inheritance) and scheduler-wide suspension.

mod ready;

pub(crate) use ready::ReadySet;

use crate::core::kernel::{with_kernel, Kernel};
use crate::core::list::{Container, LinkKind};
use crate::error::{KernelError, KernelResult};
use crate::types::{Priority, TaskHandle, WakeReason};

impl Kernel {
    // ============ List membership ============

    /// Append a task to its ready band
    pub(crate) fn add_to_ready(&mut self, idx: u8) {
        let prio = self.tasks.tcb(idx).priority;
        self.ready.insert(&mut self.tasks, idx, prio);
    }

    /// Detach the state link from whatever list holds it
    pub(crate) fn unlink_state(&mut self, idx: u8) {
        match self.tasks.tcb(idx).state_link.container {
            Some(Container::Ready(prio)) => self.ready.remove(&mut self.tasks, idx, prio),
            Some(Container::Delayed(i)) => self.delayed[i as usize].remove(&mut self.tasks, idx, LinkKind::State),
            Some(Container::Suspended) => self.suspended.remove(&mut self.tasks, idx, LinkKind::State),
            Some(Container::Terminated) => self.terminated.remove(&mut self.tasks, idx, LinkKind::State),
            Some(_) | None => {}
        }
    }

    /// Detach the event link from a wait list or the pending-ready list
    ///
    /// A task leaving a mutex wait list stops propping up the holder.
    pub(crate) fn unlink_event(&mut self, idx: u8) {
        match self.tasks.tcb(idx).event_link.container {
            Some(Container::Waiting { queue, sending }) => {
                let holder = self.mutex_waited_on(idx);
                self.queues.slots[queue as usize]
                    .waiters_mut(sending)
                    .remove(&mut self.tasks, idx, LinkKind::Event);
                if let Some(holder) = holder {
                    self.recompute_priority(holder);
                }
            }
            Some(Container::PendingReady) => self.pending_ready.remove(&mut self.tasks, idx, LinkKind::Event),
            Some(_) | None => {}
        }
    }

    /// Holder of the mutex `idx` is blocked taking, if any
    pub(crate) fn mutex_waited_on(&self, idx: u8) -> Option<u8> {
        match self.tasks.tcb(idx).event_link.container {
            Some(Container::Waiting { queue, sending: false }) => {
                let cb = &self.queues.slots[queue as usize];
                if cb.kind.is_mutex() {
                    cb.owner.filter(|&owner| owner != idx)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Make a task that was waiting on an event ready
    ///
    /// The event link must already be detached. With the scheduler
    /// suspended the task goes to the pending-ready list instead. Returns
    /// whether it outranks the running task.
    pub(crate) fn ready_after_event(&mut self, idx: u8) -> bool {
        self.tasks.tcb_mut(idx).wake_reason = WakeReason::Event;
        if self.suspend_depth == 0 {
            self.unlink_state(idx);
            self.add_to_ready(idx);
            self.reset_next_unblock();
        } else {
            self.pending_ready
                .push_back(&mut self.tasks, idx, LinkKind::Event, Container::PendingReady);
        }
        let higher = self.current.is_some() && self.tasks.tcb(idx).priority > self.current_priority();
        if higher {
            self.yield_pending = true;
        }
        higher
    }

    // ============ Priority ============

    /// Change the effective priority, keeping every list ordered
    pub(crate) fn set_effective_priority(&mut self, idx: u8, prio: Priority) {
        let old = self.tasks.tcb(idx).priority;
        if old == prio {
            return;
        }
        match self.tasks.tcb(idx).state_link.container {
            Some(Container::Ready(band)) => {
                self.ready.remove(&mut self.tasks, idx, band);
                self.tasks.tcb_mut(idx).priority = prio;
                self.ready.insert(&mut self.tasks, idx, prio);
            }
            _ => self.tasks.tcb_mut(idx).priority = prio,
        }
        if let Some(Container::Waiting { queue, sending }) = self.tasks.tcb(idx).event_link.container {
            let list = self.queues.slots[queue as usize].waiters_mut(sending);
            list.remove(&mut self.tasks, idx, LinkKind::Event);
            list.insert_ordered(
                &mut self.tasks,
                idx,
                LinkKind::Event,
                Container::Waiting { queue, sending },
                Self::wait_key(prio),
            );
        }
    }

    /// Sort key that puts higher priorities first on wait lists
    #[inline]
    pub(crate) fn wait_key(prio: Priority) -> u32 {
        (crate::config::CFG_MAX_PRIORITIES as u32) - prio as u32
    }

    /// Boost a mutex holder to a waiter's priority
    pub(crate) fn inherit_priority(&mut self, holder: u8, waiter_prio: Priority) -> bool {
        if self.tasks.tcb(holder).priority < waiter_prio {
            crate::debug!("task {=u8} inherits priority {=u8}", holder, waiter_prio);
            self.set_effective_priority(holder, waiter_prio);
            true
        } else {
            false
        }
    }

    /// Priority a task is entitled to: its base, or the best waiter on
    /// any mutex it still holds
    pub(crate) fn entitled_priority(&self, idx: u8) -> Priority {
        let base = self.tasks.tcb(idx).base_priority;
        self.queues
            .slots
            .iter()
            .filter(|q| q.in_use && q.kind.is_mutex() && q.owner == Some(idx))
            .filter_map(|q| q.receivers.head())
            .map(|w| self.tasks.tcb(w).priority)
            .fold(base, Priority::max)
    }

    /// Drop (or raise) a task to its entitled priority
    ///
    /// Returns true when a switch was requested because the task no longer
    /// outranks the best ready task.
    pub(crate) fn recompute_priority(&mut self, idx: u8) -> bool {
        let target = self.entitled_priority(idx);
        if target == self.tasks.tcb(idx).priority {
            return false;
        }
        self.set_effective_priority(idx, target);
        if Some(idx) == self.current {
            if let Some(top) = self.ready.highest(self.config.port_optimised_selection) {
                if top > target && self.config.preemption {
                    self.request_switch();
                    return true;
                }
            }
        }
        false
    }

    /// Current (possibly inherited) priority
    pub fn task_priority(&self, task: Option<TaskHandle>) -> KernelResult<Priority> {
        let idx = self.resolve(task)?;
        Ok(self.tasks.tcb(idx).priority)
    }

    /// Priority query usable from interrupt handlers
    pub fn task_priority_from_isr(&self, task: Option<TaskHandle>) -> KernelResult<Priority> {
        self.task_priority(task)
    }

    /// Base priority, ignoring inheritance
    pub fn task_base_priority(&self, task: Option<TaskHandle>) -> KernelResult<Priority> {
        let idx = self.resolve(task)?;
        Ok(self.tasks.tcb(idx).base_priority)
    }

    /// Set a task's base priority
    ///
    /// An inherited boost is kept until the holder releases its mutexes.
    /// Changing a mutex waiter re-evaluates the holder's inheritance.
    pub fn set_task_priority(&mut self, task: Option<TaskHandle>, prio: Priority) -> KernelResult<()> {
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        if prio as usize >= self.config.max_priorities {
            return Err(KernelError::InvalidPriority);
        }
        let idx = self.resolve(task)?;
        if self.idle_task == Some(idx) {
            return Err(KernelError::InvalidArgument);
        }
        self.tasks.tcb_mut(idx).base_priority = prio;
        let target = self.entitled_priority(idx);
        self.set_effective_priority(idx, target);
        // A blocked taker passes its new priority on to the holder
        if let Some(holder) = self.mutex_waited_on(idx) {
            self.recompute_priority(holder);
        }

        if self.current.is_some() && self.config.preemption {
            let top = self.ready.highest(self.config.port_optimised_selection).unwrap_or(0);
            let cur_prio = self.current_priority();
            let cur_ready = matches!(
                self.current.map(|c| self.tasks.tcb(c).state_link.container),
                Some(Some(Container::Ready(_)))
            );
            if top > cur_prio || !cur_ready {
                self.request_switch();
            }
        }
        Ok(())
    }

    // ============ Yield / suspension of the scheduler ============

    /// Give up the processor to the next task of equal or higher priority
    pub fn yield_now(&mut self) -> KernelResult<()> {
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        self.current_index()?;
        self.request_switch();
        Ok(())
    }

    /// Inhibit context switches; nests
    pub fn suspend_all(&mut self) {
        self.suspend_depth = self.suspend_depth.saturating_add(1);
    }

    /// Undo one [`Kernel::suspend_all`]
    ///
    /// At depth zero, pending-ready tasks join the ready set and pended
    /// ticks are replayed. Returns true when a switch was requested.
    pub fn resume_all(&mut self) -> KernelResult<bool> {
        if self.suspend_depth == 0 {
            return Err(KernelError::InvalidArgument);
        }
        self.suspend_depth -= 1;
        if self.suspend_depth > 0 || !self.running {
            return Ok(false);
        }

        let mut moved = false;
        while let Some(idx) = self.pending_ready.pop_front(&mut self.tasks, LinkKind::Event) {
            self.unlink_state(idx);
            self.add_to_ready(idx);
            if self.tasks.tcb(idx).priority > self.current_priority() {
                self.yield_pending = true;
            }
            moved = true;
        }
        if moved {
            self.reset_next_unblock();
        }

        while self.pended_ticks > 0 {
            if self.tick() {
                self.yield_pending = true;
            }
            self.pended_ticks -= 1;
        }

        if self.yield_pending && self.config.preemption {
            self.switch_requested = true;
            return Ok(true);
        }
        Ok(false)
    }
}

// ============ Global API ============

/// Yield the processor
pub fn os_yield() -> KernelResult<()> {
    with_kernel(|k| k.yield_now())
}

/// Change a task's base priority (`None` = caller)
pub fn os_task_priority_set(task: Option<TaskHandle>, prio: Priority) -> KernelResult<()> {
    with_kernel(|k| k.set_task_priority(task, prio))
}

/// Effective priority of a task (`None` = caller)
pub fn os_task_priority_get(task: Option<TaskHandle>) -> KernelResult<Priority> {
    with_kernel(|k| k.task_priority(task))
}
