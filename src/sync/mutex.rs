//! Mutex implementation
//!
//! Mutual exclusion with priority inheritance. A blocked taker lends its
//! priority to the holder; the holder drops back to the highest priority
//! it is still entitled to when it gives the mutex or a waiter times out.

use crate::core::kernel::{block_on, with_kernel, Kernel};
use crate::error::{KernelError, KernelResult};
use crate::sync::queue::QueueKind;
use crate::time::Wait;
use crate::types::{QueueHandle, Step, TaskHandle};

impl Kernel {
    /// Create a mutex, initially free
    pub fn create_mutex(&mut self) -> KernelResult<QueueHandle> {
        let handle = self.new_queue_object(QueueKind::Mutex, 1, 0, None)?;
        self.queues.slots[handle.index()].count = 1;
        Ok(handle)
    }

    /// Create a mutex the holder may take repeatedly
    #[cfg(feature = "recursive-mutex")]
    pub fn create_recursive_mutex(&mut self) -> KernelResult<QueueHandle> {
        let handle = self.new_queue_object(QueueKind::RecursiveMutex, 1, 0, None)?;
        self.queues.slots[handle.index()].count = 1;
        Ok(handle)
    }

    /// Take a mutex
    ///
    /// # Returns
    /// * `Ok(Step::Done(()))` - Caller now holds the mutex
    /// * `Ok(Step::Blocked)` - Caller parked, holder boosted; retry with the same `wait`
    /// * `Err(KernelError::AlreadyOwned)` - Caller already holds this (non-recursive) mutex
    /// * `Err(KernelError::IsrMisuse)` - Called from an interrupt
    pub fn mutex_take(&mut self, m: QueueHandle, wait: &mut Wait) -> KernelResult<Step<()>> {
        let idx = self.queue_of_kind(m, |k| k == QueueKind::Mutex)?;
        self.take_mutex(idx, wait)
    }

    #[cfg(feature = "recursive-mutex")]
    pub fn mutex_take_recursive(&mut self, m: QueueHandle, wait: &mut Wait) -> KernelResult<Step<()>> {
        let idx = self.queue_of_kind(m, |k| k == QueueKind::RecursiveMutex)?;
        self.take_mutex(idx, wait)
    }

    fn take_mutex(&mut self, idx: u8, wait: &mut Wait) -> KernelResult<Step<()>> {
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        let cur = self.current_index()?;
        let cb = &mut self.queues.slots[idx as usize];

        if cb.owner == Some(cur) {
            if cb.kind != QueueKind::RecursiveMutex {
                return Err(KernelError::AlreadyOwned);
            }
            cb.recursion = cb.recursion.checked_add(1).ok_or(KernelError::RecursionOverflow)?;
            return Ok(Step::Done(()));
        }

        if cb.count > 0 {
            cb.count = 0;
            cb.owner = Some(cur);
            cb.recursion = 1;
            let tcb = self.tasks.tcb_mut(cur);
            tcb.mutexes_held = tcb.mutexes_held.saturating_add(1);
            return Ok(Step::Done(()));
        }

        let holder = cb.owner;
        match self.prepare_block(wait) {
            Ok(ticks) => {
                if let Some(holder) = holder {
                    let prio = self.tasks.tcb(cur).priority;
                    self.inherit_priority(holder, prio);
                }
                self.block_current_on(Some((idx, false)), ticks)?;
                Ok(Step::Blocked)
            }
            Err(e) => {
                // A timed-out waiter no longer props up the holder
                if let Some(holder) = holder {
                    self.recompute_priority(holder);
                }
                Err(e)
            }
        }
    }

    /// Give a mutex held by the caller
    ///
    /// # Returns
    /// * `Err(KernelError::NotOwner)` - Caller does not hold the mutex
    pub fn mutex_give(&mut self, m: QueueHandle) -> KernelResult<()> {
        let idx = self.queue_of_kind(m, |k| k == QueueKind::Mutex)?;
        self.give_mutex(idx)
    }

    /// Give one level of a recursive mutex; the last level releases it
    #[cfg(feature = "recursive-mutex")]
    pub fn mutex_give_recursive(&mut self, m: QueueHandle) -> KernelResult<()> {
        let idx = self.queue_of_kind(m, |k| k == QueueKind::RecursiveMutex)?;
        self.give_mutex(idx)
    }

    fn give_mutex(&mut self, idx: u8) -> KernelResult<()> {
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        let cur = self.current_index()?;
        let cb = &mut self.queues.slots[idx as usize];
        if cb.owner != Some(cur) {
            return Err(KernelError::NotOwner);
        }
        cb.recursion -= 1;
        if cb.recursion > 0 {
            return Ok(());
        }
        self.release_mutex(idx, cur);
        Ok(())
    }

    /// Free a held mutex, wake its best waiter and disinherit the holder
    fn release_mutex(&mut self, idx: u8, holder: u8) {
        let cb = &mut self.queues.slots[idx as usize];
        cb.owner = None;
        cb.count = 1;
        cb.recursion = 0;
        let tcb = self.tasks.tcb_mut(holder);
        tcb.mutexes_held = tcb.mutexes_held.saturating_sub(1);

        let woken = self.wake_waiter(idx, false);
        let switched = self.recompute_priority(holder);
        if woken && !switched && self.config.preemption && Some(holder) == self.current {
            self.request_switch();
        }
    }

    /// Release every mutex held by a task being deleted
    pub(crate) fn release_mutexes_of(&mut self, holder: u8) {
        for idx in 0..self.queues.slots.len() {
            let cb = &self.queues.slots[idx];
            if cb.in_use && cb.kind.is_mutex() && cb.owner == Some(holder) {
                self.release_mutex(idx as u8, holder);
            }
        }
    }

    /// Task holding the mutex, if any
    pub fn mutex_holder(&self, m: QueueHandle) -> KernelResult<Option<TaskHandle>> {
        let idx = self.queue_of_kind(m, QueueKind::is_mutex)?;
        Ok(self.queues.slots[idx as usize].owner.map(TaskHandle))
    }

    /// Holder query usable from interrupt handlers
    pub fn mutex_holder_from_isr(&self, m: QueueHandle) -> KernelResult<Option<TaskHandle>> {
        self.mutex_holder(m)
    }
}

/// Mutex on the global kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutex {
    handle: QueueHandle,
}

impl Mutex {
    pub fn new() -> KernelResult<Self> {
        with_kernel(|k| k.create_mutex()).map(|handle| Mutex { handle })
    }

    #[inline]
    pub fn handle(&self) -> QueueHandle {
        self.handle
    }

    /// Block until the mutex is acquired or `wait` runs out
    pub fn lock(&self, mut wait: Wait) -> KernelResult<()> {
        block_on(|k| k.mutex_take(self.handle, &mut wait))
    }

    pub fn unlock(&self) -> KernelResult<()> {
        with_kernel(|k| k.mutex_give(self.handle))
    }

    pub fn holder(&self) -> Option<TaskHandle> {
        with_kernel(|k| k.mutex_holder(self.handle)).ok().flatten()
    }

    pub fn delete(self) -> KernelResult<()> {
        with_kernel(|k| k.delete_queue(self.handle))
    }
}

/// Recursive mutex on the global kernel
#[cfg(feature = "recursive-mutex")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursiveMutex {
    handle: QueueHandle,
}

#[cfg(feature = "recursive-mutex")]
impl RecursiveMutex {
    pub fn new() -> KernelResult<Self> {
        with_kernel(|k| k.create_recursive_mutex()).map(|handle| RecursiveMutex { handle })
    }

    #[inline]
    pub fn handle(&self) -> QueueHandle {
        self.handle
    }

    pub fn lock(&self, mut wait: Wait) -> KernelResult<()> {
        block_on(|k| k.mutex_take_recursive(self.handle, &mut wait))
    }

    pub fn unlock(&self) -> KernelResult<()> {
        with_kernel(|k| k.mutex_give_recursive(self.handle))
    }

    pub fn holder(&self) -> Option<TaskHandle> {
        with_kernel(|k| k.mutex_holder(self.handle)).ok().flatten()
    }
}
