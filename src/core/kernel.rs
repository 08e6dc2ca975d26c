//! Kernel context and the process-wide instance
//!
//! [`Kernel`] owns every task, list and object. All operations are
//! methods on it and run to completion inside one critical section. On the
//! target a single instance lives in [`KERNEL`]; tests build their own.

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::{KernelConfig, StackCheck, CFG_IDLE_TASK_PRIORITY};
use crate::core::cs_cell::CsCell;
use crate::core::hooks::Hooks;
use crate::core::list::{Container, TaskList};
use crate::core::sched::ReadySet;
use crate::core::task::{TaskTable, Tcb};
use crate::critical::{critical_section, critical_section_from_isr, is_isr_context};
use crate::error::{KernelError, KernelResult};
use crate::mem::Heap;
use crate::sync::queue::QueueTable;
use crate::sync::registry::QueueRegistry;
use crate::types::{Priority, SchedulerState, StackType, Step, TaskHandle, TickType, MAX_DELAY};

#[cfg(feature = "timers")]
use crate::timer::TimerService;

// ============ Kernel State ============

/// Scheduler, tasks, objects and heap of one kernel instance
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) hooks: Hooks,
    pub(crate) heap: Heap,

    pub(crate) tasks: TaskTable,
    pub(crate) ready: ReadySet,
    /// Two delayed lists; `delayed_cur` is the live one, the other holds
    /// wake ticks past the next counter wrap
    pub(crate) delayed: [TaskList; 2],
    pub(crate) delayed_cur: u8,
    pub(crate) pending_ready: TaskList,
    pub(crate) suspended: TaskList,
    pub(crate) terminated: TaskList,

    pub(crate) current: Option<u8>,
    pub(crate) idle_task: Option<u8>,
    pub(crate) idle_stack: Option<&'static mut [StackType]>,
    pub(crate) task_count: usize,
    pub(crate) next_task_number: u32,

    pub(crate) tick: TickType,
    pub(crate) overflow_count: u32,
    pub(crate) next_unblock: TickType,
    pub(crate) pended_ticks: TickType,

    pub(crate) running: bool,
    pub(crate) suspend_depth: u8,
    pub(crate) yield_pending: bool,
    pub(crate) switch_requested: bool,
    pub(crate) isr_depth: u8,

    pub(crate) run_time_stamp: u32,

    pub(crate) queues: QueueTable,
    pub(crate) registry: QueueRegistry,

    #[cfg(feature = "timers")]
    pub(crate) timers: TimerService,
}

impl Kernel {
    /// An instance with no heap, used to seed the global before init
    pub const fn empty() -> Self {
        Kernel {
            config: KernelConfig::DEFAULT,
            hooks: Hooks::NONE,
            heap: Heap::empty(),
            tasks: TaskTable::new(),
            ready: ReadySet::new(),
            delayed: [TaskList::new(); 2],
            delayed_cur: 0,
            pending_ready: TaskList::new(),
            suspended: TaskList::new(),
            terminated: TaskList::new(),
            current: None,
            idle_task: None,
            idle_stack: None,
            task_count: 0,
            next_task_number: 0,
            tick: KernelConfig::DEFAULT.initial_tick_count,
            overflow_count: 0,
            next_unblock: MAX_DELAY,
            pended_ticks: 0,
            running: false,
            suspend_depth: 0,
            yield_pending: false,
            switch_requested: false,
            isr_depth: 0,
            run_time_stamp: 0,
            queues: QueueTable::new(),
            registry: QueueRegistry::new(),
            #[cfg(feature = "timers")]
            timers: TimerService::new(),
        }
    }

    /// Build a kernel over `arena` with the given options
    pub fn new(config: KernelConfig, arena: &'static mut [u8]) -> KernelResult<Self> {
        config.validate()?;
        let mut kernel = Self::empty();
        kernel.config = config;
        kernel.tick = config.initial_tick_count;
        kernel.heap = Heap::new(arena);
        if !kernel.heap.is_initialized() && config.support_dynamic_allocation {
            return Err(KernelError::Configuration);
        }
        Ok(kernel)
    }

    /// Install the hook table
    pub fn set_hooks(&mut self, hooks: Hooks) {
        self.hooks = hooks;
    }

    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[inline]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Supply the idle task stack when dynamic allocation is disabled
    pub fn set_idle_task_stack(&mut self, stack: &'static mut [StackType]) {
        self.idle_stack = Some(stack);
    }

    // ============ Scheduler start ============

    /// Create the idle task (and timer daemon) and pick the first task
    ///
    /// The port then restores the context of [`Kernel::current_task`].
    pub fn start_scheduler(&mut self) -> KernelResult<()> {
        if self.running {
            return Err(KernelError::SchedulerRunning);
        }
        if self.in_isr() {
            return Err(KernelError::IsrMisuse);
        }

        let idle = match self.idle_stack.take() {
            Some(stack) => self.spawn_task(
                crate::core::idle::idle_task,
                "IDLE",
                CFG_IDLE_TASK_PRIORITY,
                core::ptr::null_mut(),
                crate::core::task::StackSource::Static(stack),
            )?,
            None => self.create_task(
                crate::core::idle::idle_task,
                "IDLE",
                self.config.minimal_stack_size,
                core::ptr::null_mut(),
                CFG_IDLE_TASK_PRIORITY,
            )?,
        };
        self.idle_task = Some(idle.0);

        #[cfg(feature = "timers")]
        self.start_timer_service()?;

        self.next_unblock = MAX_DELAY;
        self.reset_next_unblock();
        self.running = true;
        self.current = self.ready.first(self.config.port_optimised_selection);
        self.run_time_stamp = self.read_run_time_counter();
        crate::info!("scheduler started");
        Ok(())
    }

    // ============ Queries ============

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        if !self.running {
            SchedulerState::NotStarted
        } else if self.suspend_depth > 0 {
            SchedulerState::Suspended
        } else {
            SchedulerState::Running
        }
    }

    /// Task selected to run
    #[inline]
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.current.map(TaskHandle)
    }

    #[inline]
    pub fn idle_task_handle(&self) -> Option<TaskHandle> {
        self.idle_task.map(TaskHandle)
    }

    /// True while an interrupt handler is using the kernel
    #[inline]
    pub fn in_isr(&self) -> bool {
        self.isr_depth > 0 || is_isr_context()
    }

    #[inline]
    pub(crate) fn current_index(&self) -> KernelResult<u8> {
        self.current.ok_or(KernelError::SchedulerNotRunning)
    }

    #[inline]
    pub(crate) fn current_priority(&self) -> Priority {
        self.current.map_or(0, |c| self.tasks.tcb(c).priority)
    }

    pub(crate) fn tcb_of(&self, handle: TaskHandle) -> KernelResult<&Tcb> {
        let tcb = self.tasks.tcbs.get(handle.index()).ok_or(KernelError::InvalidHandle)?;
        if tcb.in_use {
            Ok(tcb)
        } else {
            Err(KernelError::InvalidHandle)
        }
    }

    /// Resolve an optional handle, `None` meaning the calling task
    pub(crate) fn resolve(&self, handle: Option<TaskHandle>) -> KernelResult<u8> {
        match handle {
            Some(h) => self.tcb_of(h).map(|_| h.0),
            None => self.current_index(),
        }
    }

    // ============ ISR bracketing ============

    /// Called by interrupt wrappers before using `*_from_isr` APIs
    #[inline]
    pub fn isr_enter(&mut self) {
        self.isr_depth = self.isr_depth.saturating_add(1);
    }

    /// Assert that an interrupt at NVIC priority `nvic_prio` may call the
    /// ISR API (at or below the syscall ceiling)
    pub fn check_interrupt_priority(&self, nvic_prio: Option<u8>) {
        crate::kernel_assert!(self, nvic_prio.map_or(true, crate::config::is_syscall_capable));
    }

    /// Leave an interrupt; `woken` requests the deferred switch
    #[inline]
    pub fn isr_exit(&mut self, woken: bool) {
        self.isr_depth = self.isr_depth.saturating_sub(1);
        if woken {
            self.request_switch();
        }
    }

    // ============ Context switch protocol ============

    /// Ask for a switch at the next opportunity
    #[inline]
    pub fn request_switch(&mut self) {
        if self.suspend_depth > 0 {
            self.yield_pending = true;
        } else {
            self.switch_requested = true;
        }
    }

    /// Preempt the caller if `prio` beats it and preemption is on
    #[inline]
    pub(crate) fn preempt_if_higher(&mut self, prio: Priority) -> bool {
        if self.config.preemption && self.current.is_some() && prio > self.current_priority() {
            self.request_switch();
            true
        } else {
            false
        }
    }

    /// Consume the switch request; the port pends PendSV when true
    #[inline]
    pub fn take_switch_request(&mut self) -> bool {
        core::mem::replace(&mut self.switch_requested, false)
    }

    #[inline]
    pub fn switch_pending(&self) -> bool {
        self.switch_requested
    }

    /// Body of the PendSV handler: account, check, rotate, select
    pub fn switch_context(&mut self) {
        if !self.running {
            return;
        }
        if self.suspend_depth > 0 {
            self.yield_pending = true;
            return;
        }
        self.yield_pending = false;

        if let Some(cur) = self.current {
            self.account_run_time(cur);
            self.check_stack(cur);
            if let Some(Container::Ready(prio)) = self.tasks.tcb(cur).state_link.container {
                self.ready.rotate(&mut self.tasks, cur, prio);
            }
        }

        let next = self.ready.first(self.config.port_optimised_selection);
        if next != self.current {
            crate::trace!("switch {} -> {}", self.current, next);
        }
        self.current = next;
    }

    /// Run a pending switch in place of PendSV; returns whether one ran
    pub fn run_pending_switch(&mut self) -> bool {
        if self.take_switch_request() {
            self.switch_context();
            true
        } else {
            false
        }
    }

    /// Slot holding the saved stack pointer of the selected task
    pub fn current_stack_slot(&mut self) -> Option<*mut *mut StackType> {
        let cur = self.current?;
        Some(&mut self.tasks.tcb_mut(cur).stack_ptr as *mut *mut StackType)
    }

    fn read_run_time_counter(&self) -> u32 {
        match self.hooks.run_time_counter {
            Some(counter) if self.config.generate_run_time_stats => counter(),
            _ => 0,
        }
    }

    fn account_run_time(&mut self, cur: u8) {
        if !self.config.generate_run_time_stats {
            return;
        }
        let now = self.read_run_time_counter();
        let spent = now.wrapping_sub(self.run_time_stamp);
        self.run_time_stamp = now;
        let tcb = self.tasks.tcb_mut(cur);
        tcb.run_time = tcb.run_time.wrapping_add(spent);
    }

    /// Stack check of the outgoing task
    fn check_stack(&mut self, cur: u8) {
        let tcb = self.tasks.tcb(cur);
        let overflowed = match self.config.stack_check {
            StackCheck::Off => false,
            StackCheck::Pointer => tcb.stack_pointer_overflowed(),
            StackCheck::Pattern => tcb.stack_pointer_overflowed() || tcb.stack_guard_damaged(),
        };
        if overflowed {
            crate::error!("stack overflow in task {=u8}", cur);
            match self.hooks.stack_overflow {
                Some(hook) => hook(TaskHandle(cur), self.tasks.tcb(cur).name()),
                None => panic!("stack overflow"),
            }
        }
    }

    // ============ Failure reporting ============

    /// Report a failed kernel assertion
    pub fn assert_failed(&self, file: &'static str, line: u32) {
        crate::error!("kernel assertion failed at line {=u32}", line);
        match self.hooks.assert_failed {
            Some(hook) => hook(file, line),
            None => panic!("kernel assertion failed"),
        }
    }

    /// Heap allocation with the malloc-failed hook
    pub(crate) fn allocate(&mut self, size: usize) -> KernelResult<core::ptr::NonNull<u8>> {
        match self.heap.allocate(size) {
            Some(p) => Ok(p),
            None => {
                crate::warn!("heap exhausted ({=usize} bytes requested)", size);
                if let Some(hook) = self.hooks.malloc_failed {
                    hook(size);
                }
                Err(KernelError::OutOfMemory)
            }
        }
    }

    pub(crate) fn release(&mut self, ptr: *mut u8) {
        if let Some(p) = core::ptr::NonNull::new(ptr) {
            // SAFETY: callers only pass pointers obtained from `allocate`.
            let freed = unsafe { self.heap.free(p) };
            crate::kernel_assert!(self, freed.is_ok());
        }
    }
}

// ============ Global Instance ============

/// Lock-free view of kernel status for exception handlers and logging
pub struct KernelFlags {
    running: AtomicBool,
    tick: AtomicU32,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            tick: AtomicU32::new(0),
        }
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn tick_get(&self) -> u32 {
        self.tick.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::Release);
    }

    #[inline(always)]
    pub(crate) fn set_tick(&self, tick: TickType) {
        self.tick.store(tick as u32, Ordering::Relaxed);
    }
}

pub static FLAGS: KernelFlags = KernelFlags::new();

/// Global kernel instance
pub(crate) static KERNEL: CsCell<Kernel> = CsCell::new(Kernel::empty());

/// Run `f` on the global kernel inside a task-level critical section
///
/// A switch requested by `f` is pended once the section is left.
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let (result, switch) = critical_section(|cs| {
        let kernel = KERNEL.get(cs);
        let result = f(kernel);
        (result, kernel.take_switch_request())
    });
    if switch {
        crate::port::pend_context_switch();
    }
    result
}

/// Run `f` on the global kernel from an interrupt handler
pub fn with_kernel_from_isr<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let (result, switch) = critical_section_from_isr(|cs| {
        let kernel = KERNEL.get(cs);
        kernel.check_interrupt_priority(crate::port::active_interrupt_priority());
        kernel.isr_enter();
        let result = f(kernel);
        kernel.isr_exit(false);
        (result, kernel.take_switch_request())
    });
    if switch {
        crate::port::pend_context_switch();
    }
    result
}

/// Drive a blocking kernel call until it completes
///
/// Each `Blocked` step parks the task; execution continues here once the
/// scheduler picks it again and the call is retried.
pub fn block_on<T>(mut op: impl FnMut(&mut Kernel) -> KernelResult<Step<T>>) -> KernelResult<T> {
    loop {
        if let Step::Done(v) = with_kernel(|k| op(k))? {
            return Ok(v);
        }
    }
}

// ============ Public API ============

/// Initialize the global kernel with default options
///
/// Must be called before any other `os_*` function.
pub fn os_init() -> KernelResult<()> {
    os_init_with(KernelConfig::DEFAULT, Hooks::NONE)
}

/// Initialize the global kernel with explicit options and hooks
pub fn os_init_with(config: KernelConfig, hooks: Hooks) -> KernelResult<()> {
    if FLAGS.is_running() {
        return Err(KernelError::SchedulerRunning);
    }
    let arena = crate::mem::take_default_arena().ok_or(KernelError::Configuration)?;
    let mut kernel = Kernel::new(config, arena)?;
    kernel.set_hooks(hooks);
    critical_section(|cs| {
        *KERNEL.get(cs) = kernel;
    });
    FLAGS.set_tick(config.initial_tick_count);
    Ok(())
}

/// Start multitasking
///
/// Creates the idle task and the timer daemon, arms SysTick and restores
/// the first task. Does not return on the target.
pub fn os_start() -> KernelResult<()> {
    let reload = critical_section(|cs| {
        let kernel = KERNEL.get(cs);
        kernel.start_scheduler()?;
        kernel.take_switch_request();
        Ok::<u32, KernelError>(kernel.config.systick_reload())
    })?;
    FLAGS.set_running(true);

    crate::port::setup_tick_interrupt(reload);
    crate::port::start_first_task();
    Ok(())
}

/// Suspend the scheduler (nests)
pub fn os_suspend_all() {
    with_kernel(|k| k.suspend_all());
}

/// Resume the scheduler; true when a switch was performed
pub fn os_resume_all() -> KernelResult<bool> {
    with_kernel(|k| k.resume_all())
}

/// Scheduler state of the global kernel
pub fn os_scheduler_state() -> SchedulerState {
    with_kernel(|k| k.scheduler_state())
}
