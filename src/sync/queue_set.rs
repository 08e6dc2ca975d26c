//! Queue sets
//!
//! A set is a queue of member handles. Every item that arrives on a
//! member queue or semaphore pushes that member's handle into the set, so
//! one task can block on several objects at once.

use crate::core::kernel::{block_on, with_kernel, with_kernel_from_isr, Kernel};
use crate::error::{KernelError, KernelResult};
use crate::sync::queue::QueueKind;
use crate::time::Wait;
use crate::types::{QueueHandle, SendPosition, Step};

impl Kernel {
    /// Create a set able to hold `length` pending events
    ///
    /// `length` must cover the combined capacity of all future members.
    pub fn create_queue_set(&mut self, length: usize) -> KernelResult<QueueHandle> {
        self.new_queue_object(QueueKind::Set, length, 1, None)
    }

    fn set_of(&self, set: QueueHandle) -> KernelResult<u8> {
        self.queue_of_kind(set, |k| k == QueueKind::Set)
    }

    /// Make `member` report into `set`
    ///
    /// # Returns
    /// * `Err(KernelError::AlreadyInSet)` - Member belongs to a set
    /// * `Err(KernelError::NotEmpty)` - Member holds items
    /// * `Err(KernelError::WrongKind)` - Member is a set or a mutex
    /// * `Err(KernelError::InvalidArgument)` - Set too short for its members
    pub fn add_to_set(&mut self, member: QueueHandle, set: QueueHandle) -> KernelResult<()> {
        let set_idx = self.set_of(set)?;
        let m_idx = self.queue_of_kind(member, |k| k == QueueKind::Queue || k.is_semaphore())?;
        let cb = &self.queues.slots[m_idx as usize];
        if cb.set.is_some() {
            return Err(KernelError::AlreadyInSet);
        }
        if cb.count > 0 {
            return Err(KernelError::NotEmpty);
        }
        let committed: usize = self
            .queues
            .slots
            .iter()
            .filter(|q| q.in_use && q.set == Some(set_idx))
            .map(|q| q.capacity)
            .sum();
        if committed + cb.capacity > self.queues.slots[set_idx as usize].capacity {
            return Err(KernelError::InvalidArgument);
        }
        self.queues.slots[m_idx as usize].set = Some(set_idx);
        Ok(())
    }

    /// Detach an empty member from its set
    pub fn remove_from_set(&mut self, member: QueueHandle, set: QueueHandle) -> KernelResult<()> {
        let set_idx = self.set_of(set)?;
        let cb = self.queue_cb(member)?;
        if cb.set != Some(set_idx) {
            return Err(KernelError::NotInSet);
        }
        if cb.count > 0 {
            return Err(KernelError::NotEmpty);
        }
        self.queues.slots[member.index()].set = None;
        Ok(())
    }

    /// Push a member handle into its set; returns `woken`
    pub(crate) fn notify_set(&mut self, set: u8, member: u8) -> bool {
        let cb = &self.queues.slots[set as usize];
        if cb.is_full() {
            // The length check in `add_to_set` makes this unreachable
            crate::kernel_assert!(self, false);
            return false;
        }
        let item = [member];
        self.queues.slots[set as usize].copy_in(&item, SendPosition::Back);
        self.wake_waiter(set, false)
    }

    /// Wait for any member to have data; returns that member
    pub fn select_from_set(&mut self, set: QueueHandle, wait: &mut Wait) -> KernelResult<Step<QueueHandle>> {
        let idx = self.set_of(set)?;
        if let Some(member) = self.pop_set(idx) {
            return Ok(Step::Done(member));
        }
        let ticks = self.prepare_block(wait)?;
        self.block_current_on(Some((idx, false)), ticks)?;
        Ok(Step::Blocked)
    }

    /// Non-blocking select for interrupt handlers
    pub fn select_from_set_from_isr(&mut self, set: QueueHandle) -> KernelResult<Option<QueueHandle>> {
        let idx = self.set_of(set)?;
        Ok(self.pop_set(idx))
    }

    fn pop_set(&mut self, idx: u8) -> Option<QueueHandle> {
        let cb = &mut self.queues.slots[idx as usize];
        if cb.count == 0 {
            return None;
        }
        let mut item = [0u8];
        cb.copy_out(&mut item, true);
        Some(QueueHandle(item[0]))
    }

    /// Set a member belongs to
    pub fn containing_set(&self, member: QueueHandle) -> KernelResult<Option<QueueHandle>> {
        Ok(self.queue_cb(member)?.set.map(QueueHandle))
    }
}

/// Queue set on the global kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSet {
    handle: QueueHandle,
}

impl QueueSet {
    pub fn new(length: usize) -> KernelResult<Self> {
        with_kernel(|k| k.create_queue_set(length)).map(|handle| QueueSet { handle })
    }

    #[inline]
    pub fn handle(&self) -> QueueHandle {
        self.handle
    }

    pub fn add(&self, member: QueueHandle) -> KernelResult<()> {
        with_kernel(|k| k.add_to_set(member, self.handle))
    }

    pub fn remove(&self, member: QueueHandle) -> KernelResult<()> {
        with_kernel(|k| k.remove_from_set(member, self.handle))
    }

    /// Block until a member has data
    pub fn select(&self, mut wait: Wait) -> KernelResult<QueueHandle> {
        block_on(|k| k.select_from_set(self.handle, &mut wait))
    }

    pub fn select_from_isr(&self) -> KernelResult<Option<QueueHandle>> {
        with_kernel_from_isr(|k| k.select_from_set_from_isr(self.handle))
    }
}
