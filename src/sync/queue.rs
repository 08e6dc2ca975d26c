//! Message queues
//!
//! A queue is a fixed-capacity ring of equally sized items copied in and
//! out by value. Semaphores, mutexes and queue sets reuse the same
//! control block with a zero (or one byte) item size.

use core::marker::PhantomData;
use core::mem::{size_of, MaybeUninit};
use core::ptr;

use crate::config::CFG_MAX_QUEUES;
use crate::core::kernel::{block_on, with_kernel, with_kernel_from_isr, Kernel};
use crate::core::list::{LinkKind, TaskList};
use crate::error::{KernelError, KernelResult};
use crate::time::Wait;
use crate::types::{QueueHandle, SendPosition, Step};

/// What a queue control block is being used as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum QueueKind {
    Queue,
    Set,
    BinarySemaphore,
    CountingSemaphore,
    Mutex,
    RecursiveMutex,
}

impl QueueKind {
    #[inline]
    pub fn is_mutex(self) -> bool {
        matches!(self, QueueKind::Mutex | QueueKind::RecursiveMutex)
    }

    #[inline]
    pub fn is_semaphore(self) -> bool {
        matches!(self, QueueKind::BinarySemaphore | QueueKind::CountingSemaphore)
    }
}

/// Queue control block
pub(crate) struct QueueCb {
    pub(crate) in_use: bool,
    pub(crate) kind: QueueKind,
    storage: *mut u8,
    storage_owned: bool,
    pub(crate) item_size: usize,
    pub(crate) capacity: usize,
    pub(crate) count: usize,
    /// Slot of the oldest item
    read: usize,
    /// Tasks blocked because the queue is full
    pub(crate) senders: TaskList,
    /// Tasks blocked because the queue is empty (or the mutex is held)
    pub(crate) receivers: TaskList,
    /// Mutex holder
    pub(crate) owner: Option<u8>,
    pub(crate) recursion: u32,
    /// Queue set this queue belongs to
    pub(crate) set: Option<u8>,
}

impl QueueCb {
    pub(crate) const EMPTY: Self = Self {
        in_use: false,
        kind: QueueKind::Queue,
        storage: ptr::null_mut(),
        storage_owned: false,
        item_size: 0,
        capacity: 0,
        count: 0,
        read: 0,
        senders: TaskList::new(),
        receivers: TaskList::new(),
        owner: None,
        recursion: 0,
        set: None,
    };

    #[inline]
    pub(crate) fn waiters_mut(&mut self, sending: bool) -> &mut TaskList {
        if sending {
            &mut self.senders
        } else {
            &mut self.receivers
        }
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        // SAFETY: slot < capacity, storage holds capacity * item_size bytes.
        unsafe { self.storage.add(slot * self.item_size) }
    }

    /// Store an item; the caller has checked there is room (or overwrite)
    pub(crate) fn copy_in(&mut self, item: &[u8], pos: SendPosition) {
        let slot = match pos {
            SendPosition::Back => {
                let s = (self.read + self.count) % self.capacity;
                self.count += 1;
                s
            }
            SendPosition::Front => {
                self.read = (self.read + self.capacity - 1) % self.capacity;
                self.count += 1;
                self.read
            }
            SendPosition::Overwrite => {
                if self.count == 0 {
                    self.count = 1;
                }
                self.read
            }
        };
        if self.item_size > 0 {
            // SAFETY: item.len() == item_size was checked by the caller.
            unsafe { ptr::copy_nonoverlapping(item.as_ptr(), self.slot_ptr(slot), self.item_size) };
        }
    }

    /// Copy the oldest item out, optionally removing it
    pub(crate) fn copy_out(&mut self, out: &mut [u8], remove: bool) {
        if self.item_size > 0 {
            // SAFETY: out.len() == item_size was checked by the caller.
            unsafe { ptr::copy_nonoverlapping(self.slot_ptr(self.read), out.as_mut_ptr(), self.item_size) };
        }
        if remove {
            self.read = (self.read + 1) % self.capacity;
            self.count -= 1;
        }
    }
}

/// Fixed table of queue control blocks
pub(crate) struct QueueTable {
    pub(crate) slots: [QueueCb; CFG_MAX_QUEUES],
}

impl QueueTable {
    pub(crate) const fn new() -> Self {
        QueueTable {
            slots: [const { QueueCb::EMPTY }; CFG_MAX_QUEUES],
        }
    }
}

impl Kernel {
    // ============ Object table ============

    pub(crate) fn queue_cb(&self, q: QueueHandle) -> KernelResult<&QueueCb> {
        match self.queues.slots.get(q.index()) {
            Some(cb) if cb.in_use => Ok(cb),
            _ => Err(KernelError::InvalidHandle),
        }
    }

    /// Validate a handle and its kind
    pub(crate) fn queue_of_kind(&self, q: QueueHandle, ok: impl Fn(QueueKind) -> bool) -> KernelResult<u8> {
        let cb = self.queue_cb(q)?;
        if ok(cb.kind) {
            Ok(q.0)
        } else {
            Err(KernelError::WrongKind)
        }
    }

    /// Claim a slot and its storage
    pub(crate) fn new_queue_object(
        &mut self,
        kind: QueueKind,
        capacity: usize,
        item_size: usize,
        storage: Option<&'static mut [u8]>,
    ) -> KernelResult<QueueHandle> {
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        if capacity == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let bytes = capacity.checked_mul(item_size).ok_or(KernelError::InvalidArgument)?;
        let slot = self
            .queues
            .slots
            .iter()
            .position(|cb| !cb.in_use)
            .ok_or(KernelError::NoFreeSlot)?;

        let (buf, owned) = match storage {
            Some(buf) => {
                if !self.config.support_static_allocation {
                    return Err(KernelError::Configuration);
                }
                if buf.len() < bytes {
                    return Err(KernelError::InvalidArgument);
                }
                (buf.as_mut_ptr(), false)
            }
            None if bytes == 0 => (ptr::null_mut(), false),
            None => {
                if !self.config.support_dynamic_allocation {
                    return Err(KernelError::Configuration);
                }
                (self.allocate(bytes)?.as_ptr(), true)
            }
        };

        self.queues.slots[slot] = QueueCb {
            in_use: true,
            kind,
            storage: buf,
            storage_owned: owned,
            item_size,
            capacity,
            ..QueueCb::EMPTY
        };
        crate::debug!("queue {=usize} created ({=usize} x {=usize})", slot, capacity, item_size);
        Ok(QueueHandle(slot as u8))
    }

    /// Wake the first task blocked on one side of a queue
    pub(crate) fn wake_waiter(&mut self, q: u8, sending: bool) -> bool {
        let list = self.queues.slots[q as usize].waiters_mut(sending);
        match list.pop_front(&mut self.tasks, LinkKind::Event) {
            Some(idx) => self.ready_after_event(idx),
            None => false,
        }
    }

    /// Announce a new item: to the owning set, else to one receiver
    pub(crate) fn announce_item(&mut self, q: u8) -> bool {
        match self.queues.slots[q as usize].set {
            #[cfg(feature = "queue-sets")]
            Some(set) => self.notify_set(set, q),
            _ => self.wake_waiter(q, false),
        }
    }

    // ============ Queue API ============

    /// Create a queue of `capacity` items of `item_size` bytes
    pub fn create_queue(&mut self, capacity: usize, item_size: usize) -> KernelResult<QueueHandle> {
        self.new_queue_object(QueueKind::Queue, capacity, item_size, None)
    }

    /// Create a queue over caller-provided storage
    pub fn create_queue_static(
        &mut self,
        capacity: usize,
        item_size: usize,
        storage: &'static mut [u8],
    ) -> KernelResult<QueueHandle> {
        self.new_queue_object(QueueKind::Queue, capacity, item_size, Some(storage))
    }

    /// Delete a queue, semaphore, mutex or set
    ///
    /// # Returns
    /// * `Err(KernelError::ObjectInUse)` - Tasks are blocked on it, it is a
    ///   set member or a non-empty set, or a mutex is held
    pub fn delete_queue(&mut self, q: QueueHandle) -> KernelResult<()> {
        let cb = self.queue_cb(q)?;
        if !cb.senders.is_empty() || !cb.receivers.is_empty() || cb.set.is_some() || cb.owner.is_some() {
            return Err(KernelError::ObjectInUse);
        }
        if cb.kind == QueueKind::Set && self.queues.slots.iter().any(|m| m.in_use && m.set == Some(q.0)) {
            return Err(KernelError::ObjectInUse);
        }
        let (storage, owned) = (cb.storage, cb.storage_owned);
        if owned {
            self.release(storage);
        }
        self.registry.remove(q);
        self.queues.slots[q.index()] = QueueCb::EMPTY;
        crate::debug!("queue {=u8} deleted", q.0);
        Ok(())
    }

    /// Empty a queue; one blocked sender is released
    pub fn reset_queue(&mut self, q: QueueHandle) -> KernelResult<()> {
        let idx = self.queue_of_kind(q, |k| !k.is_mutex())?;
        let cb = &mut self.queues.slots[idx as usize];
        cb.count = 0;
        cb.read = 0;
        if self.wake_waiter(idx, true) && self.config.preemption {
            self.request_switch();
        }
        Ok(())
    }

    /// Send an item
    ///
    /// # Returns
    /// * `Ok(Step::Done(()))` - Item stored
    /// * `Ok(Step::Blocked)` - Queue full; caller parked, retry with the same `wait`
    /// * `Err(KernelError::WouldBlock)` - Full and `wait` is zero
    /// * `Err(KernelError::Timeout)` - Still full when `wait` ran out
    pub fn queue_send(
        &mut self,
        q: QueueHandle,
        item: &[u8],
        pos: SendPosition,
        wait: &mut Wait,
    ) -> KernelResult<Step<()>> {
        let idx = self.queue_of_kind(q, |k| k == QueueKind::Queue)?;
        self.check_send(idx, item, pos)?;

        let cb = &self.queues.slots[idx as usize];
        if !cb.is_full() || pos == SendPosition::Overwrite {
            if self.store_item(idx, item, pos) && self.config.preemption {
                self.request_switch();
            }
            return Ok(Step::Done(()));
        }

        let ticks = self.prepare_block(wait)?;
        self.block_current_on(Some((idx, true)), ticks)?;
        Ok(Step::Blocked)
    }

    /// Send from an interrupt; returns `woken`
    pub fn queue_send_from_isr(&mut self, q: QueueHandle, item: &[u8], pos: SendPosition) -> KernelResult<bool> {
        let idx = self.queue_of_kind(q, |k| k == QueueKind::Queue)?;
        self.check_send(idx, item, pos)?;
        if self.queues.slots[idx as usize].is_full() && pos != SendPosition::Overwrite {
            return Err(KernelError::WouldBlock);
        }
        Ok(self.store_item(idx, item, pos))
    }

    fn check_send(&self, idx: u8, item: &[u8], pos: SendPosition) -> KernelResult<()> {
        let cb = &self.queues.slots[idx as usize];
        if item.len() != cb.item_size {
            return Err(KernelError::InvalidArgument);
        }
        if pos == SendPosition::Overwrite && cb.capacity != 1 {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }

    /// Copy the item in and wake whoever is waiting for it
    fn store_item(&mut self, idx: u8, item: &[u8], pos: SendPosition) -> bool {
        let cb = &mut self.queues.slots[idx as usize];
        let before = cb.count;
        cb.copy_in(item, pos);
        // An overwrite of an unread item is not a new arrival for a set
        if cb.set.is_some() && cb.count == before {
            return false;
        }
        self.announce_item(idx)
    }

    /// Receive (and remove) the oldest item
    pub fn queue_receive(&mut self, q: QueueHandle, out: &mut [u8], wait: &mut Wait) -> KernelResult<Step<()>> {
        self.take_item(q, out, true, wait)
    }

    /// Copy the oldest item without removing it
    pub fn queue_peek(&mut self, q: QueueHandle, out: &mut [u8], wait: &mut Wait) -> KernelResult<Step<()>> {
        self.take_item(q, out, false, wait)
    }

    fn take_item(&mut self, q: QueueHandle, out: &mut [u8], remove: bool, wait: &mut Wait) -> KernelResult<Step<()>> {
        let idx = self.queue_of_kind(q, |k| k == QueueKind::Queue)?;
        let cb = &mut self.queues.slots[idx as usize];
        if out.len() != cb.item_size {
            return Err(KernelError::InvalidArgument);
        }
        if cb.count > 0 {
            cb.copy_out(out, remove);
            // A peeked item is still there for the next reader
            let woken = self.wake_waiter(idx, remove);
            if woken && self.config.preemption {
                self.request_switch();
            }
            return Ok(Step::Done(()));
        }

        let ticks = self.prepare_block(wait)?;
        self.block_current_on(Some((idx, false)), ticks)?;
        Ok(Step::Blocked)
    }

    /// Receive from an interrupt; returns `woken`
    pub fn queue_receive_from_isr(&mut self, q: QueueHandle, out: &mut [u8]) -> KernelResult<bool> {
        let idx = self.queue_of_kind(q, |k| k == QueueKind::Queue)?;
        let cb = &mut self.queues.slots[idx as usize];
        if out.len() != cb.item_size {
            return Err(KernelError::InvalidArgument);
        }
        if cb.count == 0 {
            return Err(KernelError::WouldBlock);
        }
        cb.copy_out(out, true);
        Ok(self.wake_waiter(idx, true))
    }

    pub fn queue_peek_from_isr(&mut self, q: QueueHandle, out: &mut [u8]) -> KernelResult<()> {
        let idx = self.queue_of_kind(q, |k| k == QueueKind::Queue)?;
        let cb = &mut self.queues.slots[idx as usize];
        if out.len() != cb.item_size {
            return Err(KernelError::InvalidArgument);
        }
        if cb.count == 0 {
            return Err(KernelError::WouldBlock);
        }
        cb.copy_out(out, false);
        Ok(())
    }

    /// Items (or semaphore count) currently held
    pub fn messages_waiting(&self, q: QueueHandle) -> KernelResult<usize> {
        Ok(self.queue_cb(q)?.count)
    }

    pub fn spaces_available(&self, q: QueueHandle) -> KernelResult<usize> {
        let cb = self.queue_cb(q)?;
        Ok(cb.capacity - cb.count)
    }

    pub fn queue_is_full_from_isr(&self, q: QueueHandle) -> KernelResult<bool> {
        Ok(self.queue_cb(q)?.is_full())
    }

    pub fn queue_is_empty_from_isr(&self, q: QueueHandle) -> KernelResult<bool> {
        Ok(self.queue_cb(q)?.count == 0)
    }

    pub fn queue_kind(&self, q: QueueHandle) -> KernelResult<QueueKind> {
        Ok(self.queue_cb(q)?.kind)
    }
}

// ============ Typed handle ============

pub(crate) fn bytes_of<T: Copy>(item: &T) -> &[u8] {
    // SAFETY: any initialized `T` may be viewed as `size_of::<T>()` bytes.
    unsafe { core::slice::from_raw_parts(item as *const T as *const u8, size_of::<T>()) }
}

/// Queue of `T` values on the global kernel
pub struct Queue<T: Copy> {
    handle: QueueHandle,
    _item: PhantomData<T>,
}

impl<T: Copy> Clone for Queue<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Copy> Copy for Queue<T> {}

impl<T: Copy> Queue<T> {
    /// Create a queue holding up to `capacity` items
    pub fn new(capacity: usize) -> KernelResult<Self> {
        let handle = with_kernel(|k| k.create_queue(capacity, size_of::<T>()))?;
        Ok(Self::from_handle(handle))
    }

    /// Wrap an existing queue handle; items must be `T`
    pub const fn from_handle(handle: QueueHandle) -> Self {
        Queue {
            handle,
            _item: PhantomData,
        }
    }

    #[inline]
    pub fn handle(&self) -> QueueHandle {
        self.handle
    }

    pub fn send(&self, item: T, mut wait: Wait) -> KernelResult<()> {
        block_on(|k| k.queue_send(self.handle, bytes_of(&item), SendPosition::Back, &mut wait))
    }

    pub fn send_to_front(&self, item: T, mut wait: Wait) -> KernelResult<()> {
        block_on(|k| k.queue_send(self.handle, bytes_of(&item), SendPosition::Front, &mut wait))
    }

    /// Replace the single item of a length-1 queue
    pub fn overwrite(&self, item: T) -> KernelResult<()> {
        let mut wait = Wait::NONE;
        block_on(|k| k.queue_send(self.handle, bytes_of(&item), SendPosition::Overwrite, &mut wait))
    }

    pub fn receive(&self, mut wait: Wait) -> KernelResult<T> {
        let mut slot = MaybeUninit::<T>::uninit();
        // SAFETY: the buffer covers `slot` exactly; it is only read back
        // after the kernel copied a whole `T` into it.
        let out = unsafe { core::slice::from_raw_parts_mut(slot.as_mut_ptr() as *mut u8, size_of::<T>()) };
        block_on(|k| k.queue_receive(self.handle, out, &mut wait))?;
        Ok(unsafe { slot.assume_init() })
    }

    pub fn peek(&self, mut wait: Wait) -> KernelResult<T> {
        let mut slot = MaybeUninit::<T>::uninit();
        // SAFETY: as in `receive`.
        let out = unsafe { core::slice::from_raw_parts_mut(slot.as_mut_ptr() as *mut u8, size_of::<T>()) };
        block_on(|k| k.queue_peek(self.handle, out, &mut wait))?;
        Ok(unsafe { slot.assume_init() })
    }

    /// Send from an interrupt handler; returns `woken`
    pub fn send_from_isr(&self, item: T) -> KernelResult<bool> {
        with_kernel_from_isr(|k| {
            let woken = k.queue_send_from_isr(self.handle, bytes_of(&item), SendPosition::Back)?;
            if woken {
                k.request_switch();
            }
            Ok(woken)
        })
    }

    /// Receive from an interrupt handler; returns the item and `woken`
    pub fn receive_from_isr(&self) -> KernelResult<(T, bool)> {
        let mut slot = MaybeUninit::<T>::uninit();
        // SAFETY: as in `receive`.
        let out = unsafe { core::slice::from_raw_parts_mut(slot.as_mut_ptr() as *mut u8, size_of::<T>()) };
        let woken = with_kernel_from_isr(|k| {
            let woken = k.queue_receive_from_isr(self.handle, out)?;
            if woken {
                k.request_switch();
            }
            Ok::<bool, KernelError>(woken)
        })?;
        Ok((unsafe { slot.assume_init() }, woken))
    }

    pub fn len(&self) -> usize {
        with_kernel(|k| k.messages_waiting(self.handle)).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) -> KernelResult<()> {
        with_kernel(|k| k.reset_queue(self.handle))
    }

    /// Delete the queue; the handle must not be used afterwards
    pub fn delete(self) -> KernelResult<()> {
        with_kernel(|k| k.delete_queue(self.handle))
    }
}
