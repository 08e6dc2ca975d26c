//! Task management module
//!
//! Provides task creation, deletion, suspension and per-task queries.

mod tcb;
#[cfg(feature = "notifications")]
pub mod notify;
pub mod stats;

pub use tcb::{NotifyState, STACK_FILL_BYTE};
pub(crate) use tcb::{TaskTable, Tcb};
pub(crate) use tcb::STACK_FILL_WORD;

#[cfg(feature = "notifications")]
pub use notify::NotifyAction;
pub use stats::TaskStatus;

use crate::core::kernel::{with_kernel, with_kernel_from_isr, Kernel};
use crate::core::list::{Container, LinkKind};
use crate::error::{KernelError, KernelResult};
use crate::types::{Priority, StackType, TaskFn, TaskHandle, TaskHookFn, TaskName, TaskState, WakeReason};

/// Smallest stack the port can build an initial frame in
pub const MIN_STACK_DEPTH: usize = 32;

/// Where a new task's stack comes from
pub enum StackSource {
    /// Allocate this many words from the kernel heap
    Heap(usize),
    /// Caller-provided buffer
    Static(&'static mut [StackType]),
}

impl Kernel {
    /// Create a task on the given stack
    ///
    /// # Arguments
    /// * `entry` - Task entry point
    /// * `name` - Task name, truncated to the configured length
    /// * `prio` - Task priority (higher number runs first)
    /// * `arg` - Argument passed to `entry`
    /// * `source` - Heap depth in words, or a static buffer
    ///
    /// # Returns
    /// * `Ok(TaskHandle)` - Task created and made ready
    /// * `Err(KernelError::InvalidPriority)` - `prio` out of range
    /// * `Err(KernelError::InvalidArgument)` - Stack too small
    /// * `Err(KernelError::NoFreeSlot)` - TCB table full
    /// * `Err(KernelError::OutOfMemory)` - Heap cannot hold the stack
    pub(crate) fn spawn_task(
        &mut self,
        entry: TaskFn,
        name: &str,
        prio: Priority,
        arg: *mut (),
        source: StackSource,
    ) -> KernelResult<TaskHandle> {
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        if prio as usize >= self.config.max_priorities {
            return Err(KernelError::InvalidPriority);
        }
        let depth = match &source {
            StackSource::Heap(words) => *words,
            StackSource::Static(buf) => buf.len(),
        };
        if depth < MIN_STACK_DEPTH {
            return Err(KernelError::InvalidArgument);
        }
        let idx = self.tasks.free_slot().ok_or(KernelError::NoFreeSlot)?;

        let (base, owned) = match source {
            StackSource::Heap(words) => {
                let bytes = words
                    .checked_mul(core::mem::size_of::<StackType>())
                    .ok_or(KernelError::InvalidArgument)?;
                (self.allocate(bytes)?.as_ptr() as *mut StackType, true)
            }
            StackSource::Static(buf) => (buf.as_mut_ptr(), false),
        };

        // SAFETY: base..base+depth is exclusively owned by the new task.
        let sp = unsafe {
            for i in 0..depth {
                base.add(i).write(STACK_FILL_WORD);
            }
            crate::port::init_stack(base, depth, entry, arg)
        };

        let number = self.next_task_number;
        self.next_task_number = self.next_task_number.wrapping_add(1);

        let tcb = self.tasks.tcb_mut(idx);
        *tcb = Tcb::EMPTY;
        tcb.in_use = true;
        tcb.stack_ptr = sp;
        tcb.stack_base = base;
        tcb.stack_depth = depth;
        tcb.stack_owned = owned;
        tcb.name = TaskName::new(name);
        tcb.priority = prio;
        tcb.base_priority = prio;
        tcb.task_number = number;
        tcb.entry = Some(entry);
        tcb.arg = arg;

        self.task_count += 1;
        self.add_to_ready(idx);
        crate::debug!("task {=u8} created at priority {=u8}", idx, prio);

        if self.running {
            self.preempt_if_higher(prio);
        }
        Ok(TaskHandle(idx))
    }

    /// Create a task whose stack is taken from the kernel heap
    ///
    /// `stack_depth` is in words.
    pub fn create_task(
        &mut self,
        entry: TaskFn,
        name: &str,
        stack_depth: usize,
        arg: *mut (),
        prio: Priority,
    ) -> KernelResult<TaskHandle> {
        if !self.config.support_dynamic_allocation {
            return Err(KernelError::Configuration);
        }
        self.spawn_task(entry, name, prio, arg, StackSource::Heap(stack_depth))
    }

    /// Create a task on a caller-provided stack
    pub fn create_task_static(
        &mut self,
        entry: TaskFn,
        name: &str,
        stack: &'static mut [StackType],
        arg: *mut (),
        prio: Priority,
    ) -> KernelResult<TaskHandle> {
        if !self.config.support_static_allocation {
            return Err(KernelError::Configuration);
        }
        self.spawn_task(entry, name, prio, arg, StackSource::Static(stack))
    }

    /// Delete a task (`None` = the caller)
    ///
    /// Another task is freed at once. A task deleting itself is parked on
    /// the terminated list until the idle task reaps it.
    pub fn delete_task(&mut self, task: Option<TaskHandle>) -> KernelResult<()> {
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        let idx = self.resolve(task)?;
        if self.idle_task == Some(idx) {
            return Err(KernelError::InvalidArgument);
        }
        #[cfg(feature = "timers")]
        if self.timers.daemon == Some(idx) {
            return Err(KernelError::InvalidArgument);
        }

        self.unlink_state(idx);
        self.unlink_event(idx);
        #[cfg(feature = "mutex")]
        self.release_mutexes_of(idx);

        if Some(idx) == self.current && self.running {
            self.terminated
                .push_back(&mut self.tasks, idx, LinkKind::State, Container::Terminated);
            self.request_switch();
            crate::debug!("task {=u8} deleted itself", idx);
        } else {
            self.free_task(idx);
            crate::debug!("task {=u8} deleted", idx);
        }
        self.reset_next_unblock();
        Ok(())
    }

    /// Return a dead task's slot and stack
    pub(crate) fn free_task(&mut self, idx: u8) {
        let (base, owned) = {
            let tcb = self.tasks.tcb(idx);
            (tcb.stack_base, tcb.stack_owned)
        };
        if owned {
            self.release(base as *mut u8);
        }
        *self.tasks.tcb_mut(idx) = Tcb::EMPTY;
        self.task_count = self.task_count.saturating_sub(1);
        if self.current == Some(idx) {
            self.current = None;
        }
    }

    /// Suspend a task (`None` = the caller)
    pub fn suspend_task(&mut self, task: Option<TaskHandle>) -> KernelResult<()> {
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        let idx = self.resolve(task)?;
        if self.idle_task == Some(idx) {
            return Err(KernelError::InvalidArgument);
        }
        if self.is_explicitly_suspended(idx) {
            return Ok(());
        }

        self.unlink_state(idx);
        self.unlink_event(idx);
        self.suspended
            .push_back(&mut self.tasks, idx, LinkKind::State, Container::Suspended);
        let tcb = self.tasks.tcb_mut(idx);
        tcb.wake_reason = WakeReason::None;
        if tcb.notify_state == NotifyState::Waiting {
            tcb.notify_state = NotifyState::NotWaiting;
        }
        self.reset_next_unblock();

        if Some(idx) == self.current && self.running {
            self.request_switch();
        }
        Ok(())
    }

    /// Task parked by [`Kernel::suspend_task`], not blocked forever on an event
    fn is_explicitly_suspended(&self, idx: u8) -> bool {
        let tcb = self.tasks.tcb(idx);
        tcb.state_link.container == Some(Container::Suspended)
            && tcb.event_link.container.is_none()
            && tcb.notify_state != NotifyState::Waiting
    }

    /// Resume a suspended task
    pub fn resume_task(&mut self, task: TaskHandle) -> KernelResult<()> {
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        let idx = self.resolve(Some(task))?;
        if Some(idx) == self.current || !self.is_explicitly_suspended(idx) {
            return Err(KernelError::NotSuspended);
        }
        self.unlink_state(idx);
        self.add_to_ready(idx);
        self.preempt_if_higher(self.tasks.tcb(idx).priority);
        Ok(())
    }

    /// Resume a suspended task from an interrupt handler
    ///
    /// Returns whether the resumed task outranks the interrupted one.
    pub fn resume_task_from_isr(&mut self, task: TaskHandle) -> KernelResult<bool> {
        let idx = self.resolve(Some(task))?;
        if !self.is_explicitly_suspended(idx) {
            return Err(KernelError::NotSuspended);
        }
        let higher = self.tasks.tcb(idx).priority > self.current_priority();
        if self.suspend_depth == 0 {
            self.unlink_state(idx);
            self.add_to_ready(idx);
        } else {
            self.pending_ready
                .push_back(&mut self.tasks, idx, LinkKind::Event, Container::PendingReady);
        }
        if higher {
            self.yield_pending = true;
        }
        Ok(higher)
    }

    /// State of a task as seen from outside
    pub fn task_state(&self, task: TaskHandle) -> TaskState {
        let Ok(tcb) = self.tcb_of(task) else {
            return TaskState::Deleted;
        };
        if self.current == Some(task.0) {
            return TaskState::Running;
        }
        if tcb.event_link.container == Some(Container::PendingReady) {
            return TaskState::Ready;
        }
        match tcb.state_link.container {
            Some(Container::Ready(_)) => TaskState::Ready,
            Some(Container::Delayed(_)) => TaskState::Blocked,
            Some(Container::Suspended)
                if tcb.event_link.container.is_some() || tcb.notify_state == NotifyState::Waiting =>
            {
                TaskState::Blocked
            }
            Some(Container::Suspended) => TaskState::Suspended,
            Some(Container::Terminated) | None => TaskState::Deleted,
            Some(_) => TaskState::Blocked,
        }
    }

    /// Force a blocked task out of its wait
    ///
    /// Returns false if the task was not blocked.
    pub fn abort_delay(&mut self, task: TaskHandle) -> KernelResult<bool> {
        let idx = self.resolve(Some(task))?;
        if self.task_state(task) != TaskState::Blocked {
            return Ok(false);
        }
        self.unlink_state(idx);
        self.unlink_event(idx);
        self.tasks.tcb_mut(idx).wake_reason = WakeReason::Aborted;
        if self.suspend_depth == 0 {
            self.add_to_ready(idx);
            self.preempt_if_higher(self.tasks.tcb(idx).priority);
        } else {
            self.pending_ready
                .push_back(&mut self.tasks, idx, LinkKind::Event, Container::PendingReady);
        }
        self.reset_next_unblock();
        Ok(true)
    }

    // ============ Per-task data ============

    pub fn task_name(&self, task: Option<TaskHandle>) -> KernelResult<&str> {
        let idx = self.resolve(task)?;
        Ok(self.tasks.tcb(idx).name())
    }

    /// Find a live task by exact name
    pub fn task_by_name(&self, name: &str) -> Option<TaskHandle> {
        self.tasks
            .live()
            .find(|(_, tcb)| tcb.name() == name)
            .map(|(i, _)| TaskHandle(i))
    }

    /// Number of tasks the kernel knows about, including unreaped ones
    #[inline]
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// Minimum free stack space (in words) the task has ever had
    pub fn stack_high_water_mark(&self, task: Option<TaskHandle>) -> KernelResult<usize> {
        let idx = self.resolve(task)?;
        Ok(self.tasks.tcb(idx).stack_high_water_mark())
    }

    pub fn set_task_tag(&mut self, task: Option<TaskHandle>, tag: Option<TaskHookFn>) -> KernelResult<()> {
        let idx = self.resolve(task)?;
        self.tasks.tcb_mut(idx).tag = tag;
        Ok(())
    }

    pub fn task_tag(&self, task: Option<TaskHandle>) -> KernelResult<Option<TaskHookFn>> {
        let idx = self.resolve(task)?;
        Ok(self.tasks.tcb(idx).tag)
    }

    /// Invoke a task's tag hook with `param`
    pub fn call_task_tag(&self, task: Option<TaskHandle>, param: *mut ()) -> KernelResult<u32> {
        let idx = self.resolve(task)?;
        let hook = self.tasks.tcb(idx).tag.ok_or(KernelError::InvalidArgument)?;
        Ok(hook(param))
    }
}

// ============ Public API ============

/// Create a task with a heap-allocated stack of `stack_depth` words
pub fn os_task_create(
    entry: TaskFn,
    name: &str,
    stack_depth: usize,
    arg: *mut (),
    prio: Priority,
) -> KernelResult<TaskHandle> {
    with_kernel(|k| k.create_task(entry, name, stack_depth, arg, prio))
}

/// Create a task on a caller-provided stack
pub fn os_task_create_static(
    entry: TaskFn,
    name: &str,
    stack: &'static mut [StackType],
    arg: *mut (),
    prio: Priority,
) -> KernelResult<TaskHandle> {
    with_kernel(|k| k.create_task_static(entry, name, stack, arg, prio))
}

/// Delete a task (`None` = caller)
pub fn os_task_delete(task: Option<TaskHandle>) -> KernelResult<()> {
    with_kernel(|k| k.delete_task(task))
}

/// Suspend a task (`None` = caller)
pub fn os_task_suspend(task: Option<TaskHandle>) -> KernelResult<()> {
    with_kernel(|k| k.suspend_task(task))
}

pub fn os_task_resume(task: TaskHandle) -> KernelResult<()> {
    with_kernel(|k| k.resume_task(task))
}

/// Resume from an interrupt; returns whether a switch is due on exit
pub fn os_task_resume_from_isr(task: TaskHandle) -> KernelResult<bool> {
    with_kernel_from_isr(|k| {
        let woken = k.resume_task_from_isr(task)?;
        if woken {
            k.request_switch();
        }
        Ok(woken)
    })
}

pub fn os_task_state(task: TaskHandle) -> TaskState {
    with_kernel(|k| k.task_state(task))
}

pub fn os_task_abort_delay(task: TaskHandle) -> KernelResult<bool> {
    with_kernel(|k| k.abort_delay(task))
}

/// Handle of the calling task
pub fn os_task_current() -> Option<TaskHandle> {
    with_kernel(|k| k.current_task())
}

pub fn os_task_count() -> usize {
    with_kernel(|k| k.task_count())
}

pub fn os_task_by_name(name: &str) -> Option<TaskHandle> {
    with_kernel(|k| k.task_by_name(name))
}

pub fn os_task_stack_high_water_mark(task: Option<TaskHandle>) -> KernelResult<usize> {
    with_kernel(|k| k.stack_high_water_mark(task))
}

pub fn os_task_set_tag(task: Option<TaskHandle>, tag: Option<TaskHookFn>) -> KernelResult<()> {
    with_kernel(|k| k.set_task_tag(task, tag))
}

/// Call a task's tag hook outside the kernel lock
pub fn os_task_call_tag(task: Option<TaskHandle>, param: *mut ()) -> KernelResult<u32> {
    let hook = with_kernel(|k| k.task_tag(task))?.ok_or(KernelError::InvalidArgument)?;
    Ok(hook(param))
}
