//! Direct task notifications
//!
//! Every task owns one 32-bit notification word. Notifying never
//! allocates and wakes the target if it is waiting.

use super::NotifyState;
use crate::core::kernel::{block_on, with_kernel, with_kernel_from_isr, Kernel};
use crate::error::{KernelError, KernelResult};
use crate::time::Wait;
use crate::types::{Step, TaskHandle};

/// How a notification updates the target's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum NotifyAction {
    /// Mark pending, leave the value alone
    NoAction,
    /// OR the value in
    SetBits,
    Increment,
    SetValueWithOverwrite,
    /// Fails with `AlreadyPending` if the previous notification is unread
    SetValueWithoutOverwrite,
}

impl Kernel {
    /// Apply a notification; returns the previous value and whether the
    /// target outranks the caller
    fn deliver_notification(&mut self, idx: u8, value: u32, action: NotifyAction) -> KernelResult<(u32, bool)> {
        let tcb = self.tasks.tcb_mut(idx);
        let previous = tcb.notify_value;
        let was = tcb.notify_state;

        match action {
            NotifyAction::NoAction => {}
            NotifyAction::SetBits => tcb.notify_value |= value,
            NotifyAction::Increment => tcb.notify_value = tcb.notify_value.wrapping_add(1),
            NotifyAction::SetValueWithOverwrite => tcb.notify_value = value,
            NotifyAction::SetValueWithoutOverwrite => {
                if was == NotifyState::Pending {
                    return Err(KernelError::AlreadyPending);
                }
                tcb.notify_value = value;
            }
        }
        tcb.notify_state = NotifyState::Pending;

        if was != NotifyState::Waiting {
            return Ok((previous, false));
        }
        // The waiter is parked on a delayed or the suspended list only
        let higher = self.ready_after_event(idx);
        Ok((previous, higher))
    }

    /// Notify a task from task context
    ///
    /// # Returns
    /// * `Ok(previous)` - Value before the update
    /// * `Err(KernelError::AlreadyPending)` - `SetValueWithoutOverwrite` on an unread notification
    pub fn notify(&mut self, task: TaskHandle, value: u32, action: NotifyAction) -> KernelResult<u32> {
        let idx = self.resolve(Some(task))?;
        let (previous, higher) = self.deliver_notification(idx, value, action)?;
        if higher && self.config.preemption {
            self.request_switch();
        }
        Ok(previous)
    }

    /// Counting-semaphore style give: increment
    pub fn notify_give(&mut self, task: TaskHandle) -> KernelResult<()> {
        self.notify(task, 0, NotifyAction::Increment).map(|_| ())
    }

    /// Notify from an interrupt; returns previous value and `woken`
    pub fn notify_from_isr(
        &mut self,
        task: TaskHandle,
        value: u32,
        action: NotifyAction,
    ) -> KernelResult<(u32, bool)> {
        let idx = self.resolve(Some(task))?;
        self.deliver_notification(idx, value, action)
    }

    /// Give from an interrupt; returns `woken`
    pub fn notify_give_from_isr(&mut self, task: TaskHandle) -> KernelResult<bool> {
        self.notify_from_isr(task, 0, NotifyAction::Increment)
            .map(|(_, woken)| woken)
    }

    /// Wait for a notification
    ///
    /// `clear_on_entry` bits are cleared before the first wait, unless a
    /// notification is already pending. `clear_on_exit` bits are cleared
    /// from the value once it is returned.
    pub fn notify_wait(
        &mut self,
        clear_on_entry: u32,
        clear_on_exit: u32,
        wait: &mut Wait,
    ) -> KernelResult<Step<u32>> {
        let cur = self.current_index()?;
        {
            let tcb = self.tasks.tcb_mut(cur);
            if !wait.started() && tcb.notify_state != NotifyState::Pending {
                tcb.notify_value &= !clear_on_entry;
            }
            if tcb.notify_state == NotifyState::Pending {
                let value = tcb.notify_value;
                tcb.notify_value &= !clear_on_exit;
                tcb.notify_state = NotifyState::NotWaiting;
                return Ok(Step::Done(value));
            }
        }

        match self.prepare_block(wait) {
            Ok(ticks) => {
                self.tasks.tcb_mut(cur).notify_state = NotifyState::Waiting;
                self.block_current_on(None, ticks)?;
                Ok(Step::Blocked)
            }
            Err(e) => {
                self.tasks.tcb_mut(cur).notify_state = NotifyState::NotWaiting;
                Err(e)
            }
        }
    }

    /// Wait for the value to become non-zero, then clear or decrement it
    ///
    /// Returns the value before it was cleared or decremented.
    pub fn notify_take(&mut self, clear: bool, wait: &mut Wait) -> KernelResult<Step<u32>> {
        let cur = self.current_index()?;
        {
            let tcb = self.tasks.tcb_mut(cur);
            if tcb.notify_value != 0 {
                let value = tcb.notify_value;
                tcb.notify_value = if clear { 0 } else { value - 1 };
                tcb.notify_state = NotifyState::NotWaiting;
                return Ok(Step::Done(value));
            }
        }

        match self.prepare_block(wait) {
            Ok(ticks) => {
                self.tasks.tcb_mut(cur).notify_state = NotifyState::Waiting;
                self.block_current_on(None, ticks)?;
                Ok(Step::Blocked)
            }
            Err(e) => {
                self.tasks.tcb_mut(cur).notify_state = NotifyState::NotWaiting;
                Err(e)
            }
        }
    }

    /// Drop a pending notification; true if one was pending
    pub fn notify_state_clear(&mut self, task: Option<TaskHandle>) -> KernelResult<bool> {
        let idx = self.resolve(task)?;
        let tcb = self.tasks.tcb_mut(idx);
        if tcb.notify_state == NotifyState::Pending {
            tcb.notify_state = NotifyState::NotWaiting;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Clear `bits` of the value; returns the value before clearing
    pub fn notify_value_clear(&mut self, task: Option<TaskHandle>, bits: u32) -> KernelResult<u32> {
        let idx = self.resolve(task)?;
        let tcb = self.tasks.tcb_mut(idx);
        let previous = tcb.notify_value;
        tcb.notify_value &= !bits;
        Ok(previous)
    }

    pub fn notify_state(&self, task: TaskHandle) -> KernelResult<NotifyState> {
        Ok(self.tcb_of(task)?.notify_state)
    }
}

// ============ Public API ============

/// Notify a task; returns its previous value
pub fn os_task_notify(task: TaskHandle, value: u32, action: NotifyAction) -> KernelResult<u32> {
    with_kernel(|k| k.notify(task, value, action))
}

pub fn os_task_notify_give(task: TaskHandle) -> KernelResult<()> {
    with_kernel(|k| k.notify_give(task))
}

/// Notify from an interrupt; returns the previous value and whether a
/// higher-priority task was woken
pub fn os_task_notify_from_isr(task: TaskHandle, value: u32, action: NotifyAction) -> KernelResult<(u32, bool)> {
    with_kernel_from_isr(|k| {
        let out = k.notify_from_isr(task, value, action)?;
        if out.1 {
            k.request_switch();
        }
        Ok(out)
    })
}

pub fn os_task_notify_give_from_isr(task: TaskHandle) -> KernelResult<bool> {
    with_kernel_from_isr(|k| {
        let woken = k.notify_give_from_isr(task)?;
        if woken {
            k.request_switch();
        }
        Ok(woken)
    })
}

/// Block until notified or `wait` runs out
pub fn os_task_notify_wait(clear_on_entry: u32, clear_on_exit: u32, mut wait: Wait) -> KernelResult<u32> {
    block_on(|k| k.notify_wait(clear_on_entry, clear_on_exit, &mut wait))
}

/// Block until the notification value is non-zero
pub fn os_task_notify_take(clear: bool, mut wait: Wait) -> KernelResult<u32> {
    block_on(|k| k.notify_take(clear, &mut wait))
}

pub fn os_task_notify_state_clear(task: Option<TaskHandle>) -> KernelResult<bool> {
    with_kernel(|k| k.notify_state_clear(task))
}

pub fn os_task_notify_value_clear(task: Option<TaskHandle>, bits: u32) -> KernelResult<u32> {
    with_kernel(|k| k.notify_value_clear(task, bits))
}
