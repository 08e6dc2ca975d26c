//! Software timers
//!
//! Timers are driven by a daemon task that owns two expiry-ordered active
//! lists (current and overflow, swapped when the tick counter wraps).
//! Every API call is a command posted to the daemon's queue and stamped
//! with the tick it was issued at.

mod daemon;

pub use daemon::DaemonStep;

use core::mem::{size_of, MaybeUninit};

use crate::config::CFG_MAX_TIMERS;
use crate::core::kernel::{block_on, with_kernel, with_kernel_from_isr, Kernel};
use crate::core::list::{Link, LinkKind, LinkTable, TaskList};
use crate::error::{KernelError, KernelResult};
use crate::sync::queue::bytes_of;
use crate::time::Wait;
use crate::types::{
    PendedFn, QueueHandle, SendPosition, StackType, Step, TaskHandle, TickType, TimerCallback, TimerHandle,
};

/// Software timer control block
pub(crate) struct TimerCb {
    pub(crate) in_use: bool,
    pub(crate) name: &'static str,
    pub(crate) period: TickType,
    pub(crate) auto_reload: bool,
    pub(crate) callback: Option<TimerCallback>,
    pub(crate) id: usize,
    pub(crate) active: bool,
    /// Position in an active list; `value` is the expiry tick
    pub(crate) link: Link,
}

impl TimerCb {
    const EMPTY: Self = Self {
        in_use: false,
        name: "",
        period: 0,
        auto_reload: false,
        callback: None,
        id: 0,
        active: false,
        link: Link::EMPTY,
    };
}

pub(crate) struct TimerTable {
    pub(crate) slots: [TimerCb; CFG_MAX_TIMERS],
}

impl LinkTable for TimerTable {
    #[inline]
    fn link(&self, idx: u8, _kind: LinkKind) -> &Link {
        &self.slots[idx as usize].link
    }

    #[inline]
    fn link_mut(&mut self, idx: u8, _kind: LinkKind) -> &mut Link {
        &mut self.slots[idx as usize].link
    }
}

/// Command posted to the timer daemon
#[derive(Clone, Copy)]
pub(crate) enum TimerCommand {
    Start { timer: u8, at: TickType },
    Reset { timer: u8, at: TickType },
    Stop { timer: u8 },
    ChangePeriod { timer: u8, period: TickType, at: TickType },
    Delete { timer: u8 },
    PendCall { func: PendedFn, param: *mut (), value: u32 },
}

/// Timer table, active lists and daemon bookkeeping
pub(crate) struct TimerService {
    pub(crate) table: TimerTable,
    pub(crate) lists: [TaskList; 2],
    pub(crate) cur: u8,
    /// Tick wrapped; every timer left on the current list has expired
    pub(crate) draining: bool,
    pub(crate) last_time: TickType,
    pub(crate) commands: Option<QueueHandle>,
    pub(crate) daemon: Option<u8>,
    pub(crate) startup_done: bool,
    stack: Option<&'static mut [StackType]>,
    queue_storage: Option<&'static mut [u8]>,
}

impl TimerService {
    pub(crate) const fn new() -> Self {
        TimerService {
            table: TimerTable {
                slots: [const { TimerCb::EMPTY }; CFG_MAX_TIMERS],
            },
            lists: [TaskList::new(); 2],
            cur: 0,
            draining: false,
            last_time: 0,
            commands: None,
            daemon: None,
            startup_done: false,
            stack: None,
            queue_storage: None,
        }
    }
}

impl Kernel {
    // ============ Service setup ============

    /// Provide daemon stack and command queue storage for static-only builds
    pub fn set_timer_resources(&mut self, stack: &'static mut [StackType], queue_storage: &'static mut [u8]) {
        self.timers.stack = Some(stack);
        self.timers.queue_storage = Some(queue_storage);
    }

    fn ensure_timer_queue(&mut self) -> KernelResult<QueueHandle> {
        if let Some(q) = self.timers.commands {
            return Ok(q);
        }
        let storage = self.timers.queue_storage.take();
        let q = self.new_queue_object(
            crate::sync::QueueKind::Queue,
            self.config.timer_queue_length,
            size_of::<TimerCommand>(),
            storage,
        )?;
        self.registry.add(q, "TmrQ").ok();
        self.timers.commands = Some(q);
        Ok(q)
    }

    /// Create the command queue and the daemon task
    pub(crate) fn start_timer_service(&mut self) -> KernelResult<()> {
        self.ensure_timer_queue()?;
        let prio = self.config.timer_task_priority;
        let handle = match self.timers.stack.take() {
            Some(stack) => self.spawn_task(
                daemon::timer_daemon_task,
                "Tmr Svc",
                prio,
                core::ptr::null_mut(),
                crate::core::task::StackSource::Static(stack),
            ),
            None => self.create_task(
                daemon::timer_daemon_task,
                "Tmr Svc",
                self.config.timer_task_stack_depth,
                core::ptr::null_mut(),
                prio,
            ),
        }
        .inspect_err(|_| crate::error!("timer service failed to start"))?;
        self.timers.daemon = Some(handle.0);
        self.timers.last_time = self.tick;
        Ok(())
    }

    /// Handle of the timer daemon task
    pub fn timer_daemon_handle(&self) -> Option<TaskHandle> {
        self.timers.daemon.map(TaskHandle)
    }

    // ============ Timer objects ============

    pub(crate) fn timer_cb(&self, t: TimerHandle) -> KernelResult<&TimerCb> {
        match self.timers.table.slots.get(t.index()) {
            Some(cb) if cb.in_use => Ok(cb),
            _ => Err(KernelError::InvalidHandle),
        }
    }

    fn timer_cb_mut(&mut self, t: TimerHandle) -> KernelResult<&mut TimerCb> {
        match self.timers.table.slots.get_mut(t.index()) {
            Some(cb) if cb.in_use => Ok(cb),
            _ => Err(KernelError::InvalidHandle),
        }
    }

    /// Create a dormant timer
    ///
    /// # Arguments
    /// * `name` - Name for debugging
    /// * `period` - Period in ticks, non-zero
    /// * `auto_reload` - Re-arm after each expiry
    /// * `id` - Application value readable from the callback
    /// * `callback` - Runs in the daemon task on expiry
    pub fn create_timer(
        &mut self,
        name: &'static str,
        period: TickType,
        auto_reload: bool,
        id: usize,
        callback: TimerCallback,
    ) -> KernelResult<TimerHandle> {
        if period == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }
        let slot = self
            .timers
            .table
            .slots
            .iter()
            .position(|t| !t.in_use)
            .ok_or(KernelError::NoFreeSlot)?;
        self.ensure_timer_queue()?;
        self.timers.table.slots[slot] = TimerCb {
            in_use: true,
            name,
            period,
            auto_reload,
            callback: Some(callback),
            id,
            ..TimerCb::EMPTY
        };
        Ok(TimerHandle(slot as u8))
    }

    fn post_command(&mut self, cmd: TimerCommand, wait: &mut Wait) -> KernelResult<Step<()>> {
        let q = self.timers.commands.ok_or(KernelError::SchedulerNotRunning)?;
        self.queue_send(q, bytes_of(&cmd), SendPosition::Back, wait)
    }

    fn post_command_from_isr(&mut self, cmd: TimerCommand) -> KernelResult<bool> {
        let q = self.timers.commands.ok_or(KernelError::SchedulerNotRunning)?;
        self.queue_send_from_isr(q, bytes_of(&cmd), SendPosition::Back)
    }

    /// Take the next command, if any, without blocking
    pub(crate) fn next_command(&mut self, wait: &mut Wait) -> KernelResult<Step<TimerCommand>> {
        let q = self.timers.commands.ok_or(KernelError::SchedulerNotRunning)?;
        let mut slot = MaybeUninit::<TimerCommand>::uninit();
        // SAFETY: the buffer covers `slot` exactly and is only read back
        // once a whole command has been copied in.
        let out = unsafe { core::slice::from_raw_parts_mut(slot.as_mut_ptr() as *mut u8, size_of::<TimerCommand>()) };
        match self.queue_receive(q, out, wait)? {
            Step::Done(()) => Ok(Step::Done(unsafe { slot.assume_init() })),
            Step::Blocked => Ok(Step::Blocked),
        }
    }

    /// Start (or restart) a timer; it expires `period` ticks from now
    pub fn timer_start(&mut self, t: TimerHandle, wait: &mut Wait) -> KernelResult<Step<()>> {
        self.timer_cb(t)?;
        let at = self.tick;
        self.post_command(TimerCommand::Start { timer: t.0, at }, wait)
    }

    pub fn timer_reset(&mut self, t: TimerHandle, wait: &mut Wait) -> KernelResult<Step<()>> {
        self.timer_cb(t)?;
        let at = self.tick;
        self.post_command(TimerCommand::Reset { timer: t.0, at }, wait)
    }

    pub fn timer_stop(&mut self, t: TimerHandle, wait: &mut Wait) -> KernelResult<Step<()>> {
        self.timer_cb(t)?;
        self.post_command(TimerCommand::Stop { timer: t.0 }, wait)
    }

    /// Change the period; also starts a dormant timer
    pub fn timer_change_period(&mut self, t: TimerHandle, period: TickType, wait: &mut Wait) -> KernelResult<Step<()>> {
        if period == 0 {
            return Err(KernelError::InvalidArgument);
        }
        self.timer_cb(t)?;
        let at = self.tick;
        self.post_command(TimerCommand::ChangePeriod { timer: t.0, period, at }, wait)
    }

    pub fn timer_delete(&mut self, t: TimerHandle, wait: &mut Wait) -> KernelResult<Step<()>> {
        self.timer_cb(t)?;
        self.post_command(TimerCommand::Delete { timer: t.0 }, wait)
    }

    pub fn timer_start_from_isr(&mut self, t: TimerHandle) -> KernelResult<bool> {
        self.timer_cb(t)?;
        let at = self.tick;
        self.post_command_from_isr(TimerCommand::Start { timer: t.0, at })
    }

    pub fn timer_reset_from_isr(&mut self, t: TimerHandle) -> KernelResult<bool> {
        self.timer_cb(t)?;
        let at = self.tick;
        self.post_command_from_isr(TimerCommand::Reset { timer: t.0, at })
    }

    pub fn timer_stop_from_isr(&mut self, t: TimerHandle) -> KernelResult<bool> {
        self.timer_cb(t)?;
        self.post_command_from_isr(TimerCommand::Stop { timer: t.0 })
    }

    pub fn timer_change_period_from_isr(&mut self, t: TimerHandle, period: TickType) -> KernelResult<bool> {
        if period == 0 {
            return Err(KernelError::InvalidArgument);
        }
        self.timer_cb(t)?;
        let at = self.tick;
        self.post_command_from_isr(TimerCommand::ChangePeriod { timer: t.0, period, at })
    }

    /// Run `func(param, value)` in the daemon task
    pub fn pend_function_call(
        &mut self,
        func: PendedFn,
        param: *mut (),
        value: u32,
        wait: &mut Wait,
    ) -> KernelResult<Step<()>> {
        self.post_command(TimerCommand::PendCall { func, param, value }, wait)
    }

    pub fn pend_function_call_from_isr(&mut self, func: PendedFn, param: *mut (), value: u32) -> KernelResult<bool> {
        self.post_command_from_isr(TimerCommand::PendCall { func, param, value })
    }

    // ============ Queries ============

    pub fn timer_is_active(&self, t: TimerHandle) -> KernelResult<bool> {
        Ok(self.timer_cb(t)?.active)
    }

    pub fn timer_period(&self, t: TimerHandle) -> KernelResult<TickType> {
        Ok(self.timer_cb(t)?.period)
    }

    /// Tick at which an active timer expires next
    pub fn timer_expiry_time(&self, t: TimerHandle) -> KernelResult<Option<TickType>> {
        let cb = self.timer_cb(t)?;
        Ok(cb.link.container.map(|_| cb.link.value as TickType))
    }

    pub fn timer_name(&self, t: TimerHandle) -> KernelResult<&'static str> {
        Ok(self.timer_cb(t)?.name)
    }

    pub fn timer_id(&self, t: TimerHandle) -> KernelResult<usize> {
        Ok(self.timer_cb(t)?.id)
    }

    pub fn set_timer_id(&mut self, t: TimerHandle, id: usize) -> KernelResult<()> {
        self.timer_cb_mut(t)?.id = id;
        Ok(())
    }

    pub fn timer_auto_reload(&self, t: TimerHandle) -> KernelResult<bool> {
        Ok(self.timer_cb(t)?.auto_reload)
    }

    pub fn set_timer_auto_reload(&mut self, t: TimerHandle, auto_reload: bool) -> KernelResult<()> {
        self.timer_cb_mut(t)?.auto_reload = auto_reload;
        Ok(())
    }
}

// ============ Timer handle on the global kernel ============

/// Software timer on the global kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    handle: TimerHandle,
}

impl Timer {
    pub fn new(
        name: &'static str,
        period: TickType,
        auto_reload: bool,
        id: usize,
        callback: TimerCallback,
    ) -> KernelResult<Self> {
        with_kernel(|k| k.create_timer(name, period, auto_reload, id, callback)).map(|handle| Timer { handle })
    }

    pub const fn from_handle(handle: TimerHandle) -> Self {
        Timer { handle }
    }

    #[inline]
    pub fn handle(&self) -> TimerHandle {
        self.handle
    }

    pub fn start(&self, mut wait: Wait) -> KernelResult<()> {
        block_on(|k| k.timer_start(self.handle, &mut wait))
    }

    pub fn reset(&self, mut wait: Wait) -> KernelResult<()> {
        block_on(|k| k.timer_reset(self.handle, &mut wait))
    }

    pub fn stop(&self, mut wait: Wait) -> KernelResult<()> {
        block_on(|k| k.timer_stop(self.handle, &mut wait))
    }

    pub fn change_period(&self, period: TickType, mut wait: Wait) -> KernelResult<()> {
        block_on(|k| k.timer_change_period(self.handle, period, &mut wait))
    }

    pub fn delete(self, mut wait: Wait) -> KernelResult<()> {
        block_on(|k| k.timer_delete(self.handle, &mut wait))
    }

    pub fn start_from_isr(&self) -> KernelResult<bool> {
        with_kernel_from_isr(|k| {
            let woken = k.timer_start_from_isr(self.handle)?;
            if woken {
                k.request_switch();
            }
            Ok(woken)
        })
    }

    pub fn stop_from_isr(&self) -> KernelResult<bool> {
        with_kernel_from_isr(|k| {
            let woken = k.timer_stop_from_isr(self.handle)?;
            if woken {
                k.request_switch();
            }
            Ok(woken)
        })
    }

    pub fn is_active(&self) -> bool {
        with_kernel(|k| k.timer_is_active(self.handle)).unwrap_or(false)
    }

    pub fn id(&self) -> KernelResult<usize> {
        with_kernel(|k| k.timer_id(self.handle))
    }
}

/// Run a function in the timer daemon
pub fn os_pend_function_call(func: PendedFn, param: *mut (), value: u32, mut wait: Wait) -> KernelResult<()> {
    block_on(|k| k.pend_function_call(func, param, value, &mut wait))
}

pub fn os_pend_function_call_from_isr(func: PendedFn, param: *mut (), value: u32) -> KernelResult<bool> {
    with_kernel_from_isr(|k| {
        let woken = k.pend_function_call_from_isr(func, param, value)?;
        if woken {
            k.request_switch();
        }
        Ok(woken)
    })
}

pub fn os_timer_daemon_handle() -> Option<TaskHandle> {
    with_kernel(|k| k.timer_daemon_handle())
}
