//! Core type definitions
//!
//! Handles, tick/priority aliases and the small state enums shared by the
//! scheduler, the primitives and the port.

/// Task priority (0 = lowest; the idle task runs at 0)
pub type Priority = u8;

/// Tick counter type
#[cfg(not(feature = "tick-16bit"))]
pub type TickType = u32;

/// Tick counter type
#[cfg(feature = "tick-16bit")]
pub type TickType = u16;

/// Block forever
pub const MAX_DELAY: TickType = TickType::MAX;

/// Stack element type
pub type StackType = u32;

/// Task entry point function type
pub type TaskFn = fn(*mut ()) -> !;

/// Application task tag (hook attached to a task)
pub type TaskHookFn = fn(*mut ()) -> u32;

/// Software timer expiry callback
pub type TimerCallback = fn(TimerHandle);

/// Function executed in the timer daemon on request
pub type PendedFn = fn(*mut (), u32);

/// Handle to a task slot
///
/// A handle is the slot index. It is invalid once the task is deleted, and
/// a later task created in the same slot is reachable through it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub struct TaskHandle(pub(crate) u8);

impl TaskHandle {
    #[inline(always)]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    /// Slot number, stable for the life of the task
    #[inline]
    pub const fn slot(self) -> u8 {
        self.0
    }
}

/// Handle to a queue, semaphore, mutex or queue set
///
/// Becomes invalid on delete; the slot (and the handle value) is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[repr(transparent)]
pub struct QueueHandle(pub(crate) u8);

impl QueueHandle {
    #[inline(always)]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a software timer
///
/// Becomes invalid on delete; the slot (and the handle value) is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub struct TimerHandle(pub(crate) u8);

impl TimerHandle {
    #[inline(always)]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Reported task state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[repr(u8)]
pub enum TaskState {
    Running = 0,
    Ready = 1,
    Blocked = 2,
    Suspended = 3,
    Deleted = 4,
}

impl TaskState {
    /// Single-letter code used by the task list writer
    pub const fn code(self) -> char {
        match self {
            TaskState::Running => 'X',
            TaskState::Ready => 'R',
            TaskState::Blocked => 'B',
            TaskState::Suspended => 'S',
            TaskState::Deleted => 'D',
        }
    }
}

/// Why a blocked task was made ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[repr(u8)]
pub enum WakeReason {
    None = 0,
    Event = 1,
    Timeout = 2,
    Aborted = 3,
}

/// Scheduler-wide state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum SchedulerState {
    NotStarted,
    Running,
    Suspended,
}

/// Where a queue send places the item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum SendPosition {
    Back,
    Front,
    /// Only valid for queues of capacity 1
    Overwrite,
}

/// Result of a call that may have to block the caller
///
/// `Blocked` means the caller was parked and a switch was requested; the
/// same call must be repeated with the same [`Wait`](crate::time::Wait)
/// once the task runs again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Step<T> {
    Done(T),
    Blocked,
}

impl<T> Step<T> {
    #[inline]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Step::Blocked)
    }

    /// The completed value, if any
    #[inline]
    pub fn done(self) -> Option<T> {
        match self {
            Step::Done(v) => Some(v),
            Step::Blocked => None,
        }
    }
}

/// Copy a name into a fixed, truncated buffer
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TaskName {
    bytes: [u8; crate::config::CFG_MAX_TASK_NAME_LEN],
    len: u8,
}

impl TaskName {
    pub const EMPTY: Self = Self {
        bytes: [0; crate::config::CFG_MAX_TASK_NAME_LEN],
        len: 0,
    };

    pub fn new(name: &str) -> Self {
        let mut out = Self::EMPTY;
        // Truncate on a char boundary so `as_str` stays valid UTF-8
        let mut end = name.len().min(out.bytes.len());
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        out.bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        out.len = end as u8;
        out
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl core::fmt::Debug for TaskName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
