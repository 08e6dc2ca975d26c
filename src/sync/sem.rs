//! Semaphore implementation
//!
//! Binary and counting semaphores are queues of zero-sized items: the
//! count is the number of queued items and the maximum is the capacity.

use crate::core::kernel::{block_on, with_kernel, with_kernel_from_isr, Kernel};
use crate::error::{KernelError, KernelResult};
use crate::sync::queue::QueueKind;
use crate::time::Wait;
use crate::types::{QueueHandle, Step};

impl Kernel {
    /// Create a binary semaphore; it starts empty
    pub fn create_binary_semaphore(&mut self) -> KernelResult<QueueHandle> {
        self.new_queue_object(QueueKind::BinarySemaphore, 1, 0, None)
    }

    /// Create a counting semaphore
    ///
    /// # Returns
    /// * `Err(KernelError::InvalidArgument)` - `max` is zero or `initial > max`
    pub fn create_counting_semaphore(&mut self, max: usize, initial: usize) -> KernelResult<QueueHandle> {
        if max == 0 || initial > max {
            return Err(KernelError::InvalidArgument);
        }
        let handle = self.new_queue_object(QueueKind::CountingSemaphore, max, 0, None)?;
        self.queues.slots[handle.index()].count = initial;
        Ok(handle)
    }

    fn semaphore(&self, s: QueueHandle) -> KernelResult<u8> {
        self.queue_of_kind(s, QueueKind::is_semaphore)
    }

    /// Give (post) a semaphore
    ///
    /// Giving never blocks; at the maximum count it fails with
    /// `WouldBlock` and the count is unchanged.
    pub fn semaphore_give(&mut self, s: QueueHandle) -> KernelResult<()> {
        let idx = self.semaphore(s)?;
        if self.give_count(idx)? && self.config.preemption {
            self.request_switch();
        }
        Ok(())
    }

    /// Give from an interrupt; returns `woken`
    pub fn semaphore_give_from_isr(&mut self, s: QueueHandle) -> KernelResult<bool> {
        let idx = self.semaphore(s)?;
        self.give_count(idx)
    }

    fn give_count(&mut self, idx: u8) -> KernelResult<bool> {
        let cb = &mut self.queues.slots[idx as usize];
        if cb.is_full() {
            return Err(KernelError::WouldBlock);
        }
        cb.count += 1;
        Ok(self.announce_item(idx))
    }

    /// Take (pend on) a semaphore
    ///
    /// # Returns
    /// * `Ok(Step::Done(()))` - Count decremented
    /// * `Ok(Step::Blocked)` - Caller parked; retry with the same `wait`
    /// * `Err(KernelError::WouldBlock)` / `Err(KernelError::Timeout)` - Not available
    pub fn semaphore_take(&mut self, s: QueueHandle, wait: &mut Wait) -> KernelResult<Step<()>> {
        let idx = self.semaphore(s)?;
        let cb = &mut self.queues.slots[idx as usize];
        if cb.count > 0 {
            cb.count -= 1;
            return Ok(Step::Done(()));
        }
        let ticks = self.prepare_block(wait)?;
        self.block_current_on(Some((idx, false)), ticks)?;
        Ok(Step::Blocked)
    }

    /// Take from an interrupt; never blocks
    pub fn semaphore_take_from_isr(&mut self, s: QueueHandle) -> KernelResult<()> {
        let idx = self.semaphore(s)?;
        let cb = &mut self.queues.slots[idx as usize];
        if cb.count == 0 {
            return Err(KernelError::WouldBlock);
        }
        cb.count -= 1;
        Ok(())
    }

    pub fn semaphore_count(&self, s: QueueHandle) -> KernelResult<usize> {
        let idx = self.semaphore(s)?;
        Ok(self.queues.slots[idx as usize].count)
    }
}

/// Semaphore on the global kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Semaphore {
    handle: QueueHandle,
}

impl Semaphore {
    /// Create a binary semaphore (initially empty)
    pub fn binary() -> KernelResult<Self> {
        with_kernel(|k| k.create_binary_semaphore()).map(|handle| Semaphore { handle })
    }

    /// Create a counting semaphore
    ///
    /// # Arguments
    /// * `max` - Maximum count
    /// * `initial` - Initial count, at most `max`
    pub fn counting(max: usize, initial: usize) -> KernelResult<Self> {
        with_kernel(|k| k.create_counting_semaphore(max, initial)).map(|handle| Semaphore { handle })
    }

    #[inline]
    pub fn handle(&self) -> QueueHandle {
        self.handle
    }

    pub fn give(&self) -> KernelResult<()> {
        with_kernel(|k| k.semaphore_give(self.handle))
    }

    /// Block until the semaphore is available or `wait` runs out
    pub fn take(&self, mut wait: Wait) -> KernelResult<()> {
        block_on(|k| k.semaphore_take(self.handle, &mut wait))
    }

    pub fn give_from_isr(&self) -> KernelResult<bool> {
        with_kernel_from_isr(|k| {
            let woken = k.semaphore_give_from_isr(self.handle)?;
            if woken {
                k.request_switch();
            }
            Ok(woken)
        })
    }

    pub fn take_from_isr(&self) -> KernelResult<()> {
        with_kernel_from_isr(|k| k.semaphore_take_from_isr(self.handle))
    }

    pub fn count(&self) -> usize {
        with_kernel(|k| k.semaphore_count(self.handle)).unwrap_or(0)
    }

    pub fn delete(self) -> KernelResult<()> {
        with_kernel(|k| k.delete_queue(self.handle))
    }
}
