//! Task status snapshots and the text formatters built on them

use core::fmt;

use crate::core::kernel::{with_kernel, Kernel};
use crate::types::{Priority, TaskHandle, TaskName, TaskState};

/// Point-in-time view of one task
#[derive(Debug, Clone, Copy)]
pub struct TaskStatus {
    pub handle: TaskHandle,
    pub name: TaskName,
    pub state: TaskState,
    pub current_priority: Priority,
    pub base_priority: Priority,
    pub run_time: u32,
    /// Minimum free stack, in words
    pub stack_high_water_mark: usize,
    pub task_number: u32,
}

impl TaskStatus {
    /// Placeholder for sizing snapshot buffers
    pub const EMPTY: Self = Self {
        handle: TaskHandle(0),
        name: TaskName::EMPTY,
        state: TaskState::Deleted,
        current_priority: 0,
        base_priority: 0,
        run_time: 0,
        stack_high_water_mark: 0,
        task_number: 0,
    };
}

impl Kernel {
    /// Fill `out` with the status of every live task
    ///
    /// Returns the number of entries written; tasks beyond `out.len()`
    /// are skipped.
    pub fn task_status_snapshot(&self, out: &mut [TaskStatus]) -> usize {
        let mut n = 0;
        for (idx, tcb) in self.tasks.live() {
            if n == out.len() {
                break;
            }
            let handle = TaskHandle(idx);
            out[n] = TaskStatus {
                handle,
                name: tcb.name,
                state: self.task_state(handle),
                current_priority: tcb.priority,
                base_priority: tcb.base_priority,
                run_time: tcb.run_time,
                stack_high_water_mark: tcb.stack_high_water_mark(),
                task_number: tcb.task_number,
            };
            n += 1;
        }
        n
    }

    /// One line per task: name, state code, priority, stack, number
    pub fn write_task_list<W: fmt::Write>(&self, w: &mut W) -> fmt::Result {
        for (idx, tcb) in self.tasks.live() {
            let state = self.task_state(TaskHandle(idx));
            writeln!(
                w,
                "{:<16}{}\t{}\t{}\t{}",
                tcb.name(),
                state.code(),
                tcb.priority,
                tcb.stack_high_water_mark(),
                tcb.task_number
            )?;
        }
        Ok(())
    }

    /// One line per task: name, absolute run time, percentage of total
    pub fn write_run_time_stats<W: fmt::Write>(&self, w: &mut W) -> fmt::Result {
        let total: u64 = self.tasks.live().map(|(_, t)| t.run_time as u64).sum();
        let pct_base = total / 100;
        for (_, tcb) in self.tasks.live() {
            if pct_base > 0 {
                let pct = tcb.run_time as u64 / pct_base;
                if pct > 0 {
                    writeln!(w, "{:<16}{}\t\t{}%", tcb.name(), tcb.run_time, pct)?;
                } else {
                    writeln!(w, "{:<16}{}\t\t<1%", tcb.name(), tcb.run_time)?;
                }
            } else {
                writeln!(w, "{:<16}{}", tcb.name(), tcb.run_time)?;
            }
        }
        Ok(())
    }

    /// Run-time counter of one task
    pub fn task_run_time(&self, task: TaskHandle) -> crate::error::KernelResult<u32> {
        Ok(self.tcb_of(task)?.run_time)
    }
}

/// Snapshot every task of the global kernel
pub fn os_task_status_snapshot(out: &mut [TaskStatus]) -> usize {
    with_kernel(|k| k.task_status_snapshot(out))
}
