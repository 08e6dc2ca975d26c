//! Ready set: one FIFO band per priority plus the priority bitmap

use crate::config::CFG_MAX_PRIORITIES;
use crate::core::list::{Container, LinkKind, LinkTable, TaskList};
use crate::prio::PriorityBitmap;
use crate::types::Priority;

pub(crate) struct ReadySet {
    pub(crate) bands: [TaskList; CFG_MAX_PRIORITIES],
    bitmap: PriorityBitmap,
    /// Upper bound on the highest non-empty band (generic selection)
    top: Priority,
}

impl ReadySet {
    pub(crate) const fn new() -> Self {
        ReadySet {
            bands: [TaskList::new(); CFG_MAX_PRIORITIES],
            bitmap: PriorityBitmap::new(),
            top: 0,
        }
    }

    /// Append a task to the back of its band
    pub(crate) fn insert<T: LinkTable>(&mut self, table: &mut T, idx: u8, prio: Priority) {
        self.bands[prio as usize].push_back(table, idx, LinkKind::State, Container::Ready(prio));
        self.bitmap.insert(prio);
        if prio > self.top {
            self.top = prio;
        }
    }

    pub(crate) fn remove<T: LinkTable>(&mut self, table: &mut T, idx: u8, prio: Priority) {
        let band = &mut self.bands[prio as usize];
        band.remove(table, idx, LinkKind::State);
        if band.is_empty() {
            self.bitmap.remove(prio);
        }
    }

    /// Send a task to the back of its band
    pub(crate) fn rotate<T: LinkTable>(&mut self, table: &mut T, idx: u8, prio: Priority) {
        self.bands[prio as usize].move_to_back(table, idx, LinkKind::State);
    }

    #[inline]
    pub(crate) fn band_len(&self, prio: Priority) -> usize {
        self.bands[prio as usize].len()
    }

    /// Highest priority with a ready task
    pub(crate) fn highest(&mut self, use_bitmap: bool) -> Option<Priority> {
        if use_bitmap {
            return self.bitmap.highest();
        }
        while self.top > 0 && self.bands[self.top as usize].is_empty() {
            self.top -= 1;
        }
        if self.bands[self.top as usize].is_empty() {
            None
        } else {
            Some(self.top)
        }
    }

    /// Task at the front of the highest band
    pub(crate) fn first(&mut self, use_bitmap: bool) -> Option<u8> {
        let prio = self.highest(use_bitmap)?;
        self.bands[prio as usize].head()
    }
}
