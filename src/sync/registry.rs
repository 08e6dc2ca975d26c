//! Queue registry
//!
//! Associates human-readable names with queues for debuggers and logs.

use crate::config::CFG_QUEUE_REGISTRY_SIZE;
use crate::core::kernel::{with_kernel, Kernel};
use crate::error::{KernelError, KernelResult};
use crate::types::QueueHandle;

#[derive(Clone, Copy)]
struct Entry {
    queue: Option<QueueHandle>,
    name: &'static str,
}

impl Entry {
    const FREE: Self = Self { queue: None, name: "" };
}

/// Fixed table of (queue, name) pairs
pub(crate) struct QueueRegistry {
    entries: [Entry; CFG_QUEUE_REGISTRY_SIZE],
}

impl QueueRegistry {
    pub(crate) const fn new() -> Self {
        QueueRegistry {
            entries: [Entry::FREE; CFG_QUEUE_REGISTRY_SIZE],
        }
    }

    /// Name (or rename) a queue
    pub(crate) fn add(&mut self, queue: QueueHandle, name: &'static str) -> KernelResult<()> {
        if let Some(e) = self.entries.iter_mut().find(|e| e.queue == Some(queue)) {
            e.name = name;
            return Ok(());
        }
        let slot = self
            .entries
            .iter_mut()
            .find(|e| e.queue.is_none())
            .ok_or(KernelError::NoFreeSlot)?;
        *slot = Entry {
            queue: Some(queue),
            name,
        };
        Ok(())
    }

    pub(crate) fn remove(&mut self, queue: QueueHandle) {
        for e in self.entries.iter_mut().filter(|e| e.queue == Some(queue)) {
            *e = Entry::FREE;
        }
    }

    pub(crate) fn name_of(&self, queue: QueueHandle) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|e| e.queue == Some(queue))
            .map(|e| e.name)
    }
}

impl Kernel {
    /// Register a name for a queue
    pub fn queue_register(&mut self, queue: QueueHandle, name: &'static str) -> KernelResult<()> {
        self.queue_cb(queue)?;
        self.registry.add(queue, name)
    }

    pub fn queue_unregister(&mut self, queue: QueueHandle) {
        self.registry.remove(queue);
    }

    pub fn queue_name(&self, queue: QueueHandle) -> Option<&'static str> {
        self.registry.name_of(queue)
    }
}

pub fn os_queue_register(queue: QueueHandle, name: &'static str) -> KernelResult<()> {
    with_kernel(|k| k.queue_register(queue, name))
}

pub fn os_queue_unregister(queue: QueueHandle) {
    with_kernel(|k| k.queue_unregister(queue))
}

pub fn os_queue_name(queue: QueueHandle) -> Option<&'static str> {
    with_kernel(|k| k.queue_name(queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rename_and_remove() {
        let mut reg = QueueRegistry::new();
        let q = QueueHandle(3);
        reg.add(q, "rx").unwrap();
        assert_eq!(reg.name_of(q), Some("rx"));
        reg.add(q, "uart-rx").unwrap();
        assert_eq!(reg.name_of(q), Some("uart-rx"));
        reg.remove(q);
        assert_eq!(reg.name_of(q), None);
    }

    #[test]
    fn full_registry_rejects() {
        let mut reg = QueueRegistry::new();
        for i in 0..CFG_QUEUE_REGISTRY_SIZE {
            reg.add(QueueHandle(i as u8), "q").unwrap();
        }
        assert_eq!(
            reg.add(QueueHandle(CFG_QUEUE_REGISTRY_SIZE as u8), "extra"),
            Err(KernelError::NoFreeSlot)
        );
    }
}
