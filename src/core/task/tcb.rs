//! Task Control Block

use core::ptr;

use crate::config::CFG_MAX_TASKS;
use crate::core::list::{Link, LinkKind, LinkTable};
use crate::types::{Priority, StackType, TaskFn, TaskHookFn, TaskName, WakeReason};

/// Fill value written over fresh stacks
pub const STACK_FILL_BYTE: u8 = 0xA5;
pub(crate) const STACK_FILL_WORD: StackType = 0xA5A5_A5A5;

/// Words at the stack limit that must keep the fill pattern
pub(crate) const STACK_GUARD_WORDS: usize = 4;

/// Notification state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyState {
    NotWaiting,
    Waiting,
    Pending,
}

/// Task Control Block
pub struct Tcb {
    pub(crate) in_use: bool,
    /// Saved stack pointer; written by the port on switch-out
    pub(crate) stack_ptr: *mut StackType,
    /// Lowest address of the stack (stacks grow down)
    pub(crate) stack_base: *mut StackType,
    pub(crate) stack_depth: usize,
    /// Stack came from the kernel heap and is freed on reaping
    pub(crate) stack_owned: bool,

    pub(crate) name: TaskName,
    pub(crate) priority: Priority,
    pub(crate) base_priority: Priority,
    pub(crate) mutexes_held: u8,

    pub(crate) state_link: Link,
    pub(crate) event_link: Link,
    pub(crate) wake_reason: WakeReason,

    pub(crate) notify_value: u32,
    pub(crate) notify_state: NotifyState,

    pub(crate) tag: Option<TaskHookFn>,
    pub(crate) task_number: u32,
    pub(crate) run_time: u32,

    pub(crate) entry: Option<TaskFn>,
    pub(crate) arg: *mut (),
}

impl Tcb {
    pub const EMPTY: Self = Self {
        in_use: false,
        stack_ptr: ptr::null_mut(),
        stack_base: ptr::null_mut(),
        stack_depth: 0,
        stack_owned: false,
        name: TaskName::EMPTY,
        priority: 0,
        base_priority: 0,
        mutexes_held: 0,
        state_link: Link::EMPTY,
        event_link: Link::EMPTY,
        wake_reason: WakeReason::None,
        notify_value: 0,
        notify_state: NotifyState::NotWaiting,
        tag: None,
        task_number: 0,
        run_time: 0,
        entry: None,
        arg: ptr::null_mut(),
    };

    #[inline]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    /// Words from the stack limit that were never written
    pub fn stack_high_water_mark(&self) -> usize {
        if self.stack_base.is_null() {
            return 0;
        }
        let mut n = 0;
        // SAFETY: stack_base..stack_base+depth is the task's own stack.
        unsafe {
            while n < self.stack_depth && *self.stack_base.add(n) == STACK_FILL_WORD {
                n += 1;
            }
        }
        n
    }

    /// Saved stack pointer ran below the stack base
    pub(crate) fn stack_pointer_overflowed(&self) -> bool {
        !self.stack_base.is_null() && self.stack_ptr < self.stack_base
    }

    /// Fill pattern at the stack limit has been overwritten
    pub(crate) fn stack_guard_damaged(&self) -> bool {
        if self.stack_base.is_null() {
            return false;
        }
        let words = STACK_GUARD_WORDS.min(self.stack_depth);
        // SAFETY: reads stay within the task's stack.
        unsafe { (0..words).any(|i| *self.stack_base.add(i) != STACK_FILL_WORD) }
    }
}

/// Fixed table of task control blocks
pub struct TaskTable {
    pub(crate) tcbs: [Tcb; CFG_MAX_TASKS],
}

impl TaskTable {
    pub const fn new() -> Self {
        TaskTable {
            tcbs: [const { Tcb::EMPTY }; CFG_MAX_TASKS],
        }
    }

    #[inline(always)]
    pub(crate) fn tcb(&self, idx: u8) -> &Tcb {
        &self.tcbs[idx as usize]
    }

    #[inline(always)]
    pub(crate) fn tcb_mut(&mut self, idx: u8) -> &mut Tcb {
        &mut self.tcbs[idx as usize]
    }

    pub(crate) fn free_slot(&self) -> Option<u8> {
        self.tcbs.iter().position(|t| !t.in_use).map(|i| i as u8)
    }

    pub(crate) fn live(&self) -> impl Iterator<Item = (u8, &Tcb)> {
        self.tcbs
            .iter()
            .enumerate()
            .filter(|(_, t)| t.in_use)
            .map(|(i, t)| (i as u8, t))
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkTable for TaskTable {
    #[inline(always)]
    fn link(&self, idx: u8, kind: LinkKind) -> &Link {
        let tcb = &self.tcbs[idx as usize];
        match kind {
            LinkKind::State => &tcb.state_link,
            LinkKind::Event => &tcb.event_link,
        }
    }

    #[inline(always)]
    fn link_mut(&mut self, idx: u8, kind: LinkKind) -> &mut Link {
        let tcb = &mut self.tcbs[idx as usize];
        match kind {
            LinkKind::State => &mut tcb.state_link,
            LinkKind::Event => &mut tcb.event_link,
        }
    }
}
