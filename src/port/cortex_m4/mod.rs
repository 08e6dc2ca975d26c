//! Cortex-M4 port implementation
//!
//! Provides context switching via the PendSV exception handler, the
//! SysTick tick source and tickless sleep.

#![allow(named_asm_labels)]

use core::arch::{asm, naked_asm};
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;

use crate::config::CFG_KERNEL_INTERRUPT_PRIORITY;
use crate::core::kernel::KERNEL;
use crate::critical::{active_exception, critical_section_from_isr};
use crate::time::SleepMode;
use crate::types::{StackType, TaskFn, TickType};

/// Interrupt stack for MSP
#[no_mangle]
static mut INTERRUPT_STACK: [u64; 256] = [0xDEADBEEF_DEADBEEF; 256];

/// Saved-stack-pointer slot of the running task (null before the first switch)
#[no_mangle]
static mut RUNNING_SP_SLOT: *mut *mut StackType = ptr::null_mut();

/// SysTick reload for one tick
static TICK_RELOAD: AtomicU32 = AtomicU32::new(0);

/// Largest SysTick reload value (24-bit counter)
const SYSTICK_MAX_RELOAD: u32 = 0x00FF_FFFF;

/// Initialize SysTick timer for system tick generation
///
/// # Arguments
/// * `reload` - Core clock cycles per tick
///
/// # Example
/// For 16MHz clock with 1000Hz tick rate: reload = 16_000_000 / 1000 = 16_000
pub fn setup_tick_interrupt(reload: u32) {
    let mut p = unsafe { cortex_m::Peripherals::steal() };
    TICK_RELOAD.store(reload, Ordering::Relaxed);

    p.SYST.set_reload(reload - 1);
    p.SYST.clear_current();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// Start the task selected by the scheduler
///
/// Never returns to the caller: the first PendSV discards the main
/// thread context.
#[allow(static_mut_refs)]
pub fn start_first_task() {
    unsafe {
        let mut scb = cortex_m::Peripherals::steal().SCB;

        // PendSV and SysTick at the lowest priority
        scb.set_priority(SystemHandler::PendSV, CFG_KERNEL_INTERRUPT_PRIORITY);
        scb.set_priority(SystemHandler::SysTick, CFG_KERNEL_INTERRUPT_PRIORITY);

        // Switch MSP to dedicated interrupt stack
        let msp_top = &INTERRUPT_STACK as *const _ as u32 + core::mem::size_of_val(&INTERRUPT_STACK) as u32;

        asm!("msr msp, {0}", in(reg) msp_top,);
        asm!("msr psp, {0}", in(reg) 0);

        RUNNING_SP_SLOT = ptr::null_mut();

        cortex_m::interrupt::enable();
        cortex_m::peripheral::SCB::set_pendsv();
    }
    loop {
        cortex_m::asm::wfi();
    }
}

/// Request a deferred context switch
#[inline(always)]
pub fn pend_context_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Context structure stored on stack
#[repr(C, align(4))]
struct TaskFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    exc_return: u32, // LR value for exception return
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}
const FRAME_WORDS: usize = 17;

/// Build the initial exception frame of a new task
///
/// # Safety
/// `base..base + depth` must be a valid stack owned by the new task.
pub unsafe fn init_stack(base: *mut StackType, depth: usize, entry: TaskFn, arg: *mut ()) -> *mut StackType {
    unsafe {
        let top = base.add(depth);
        let aligned = ((top as usize) & !7) as *mut u32;

        let frame = aligned.sub(FRAME_WORDS) as *mut TaskFrame;

        frame.write(TaskFrame {
            r4: 0x04040404,
            r5: 0x05050505,
            r6: 0x06060606,
            r7: 0x07070707,
            r8: 0x08080808,
            r9: 0x09090909,
            r10: 0x10101010,
            r11: 0x11111111,
            exc_return: 0xFFFF_FFFD,
            r0: arg as u32,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: task_exit_error as *const () as u32,
            pc: (entry as usize as u32) | 1,
            xpsr: 0x0100_0000,
        });

        // One word below the frame, matching PendSV's "add r0, r0, #4"
        (frame as *mut u32).sub(1) as *mut StackType
    }
}

/// Save the outgoing stack pointer, run the scheduler, return the incoming one
#[inline(never)]
#[no_mangle]
unsafe extern "C" fn pendsv_switch_context(sp: *mut StackType) -> *mut StackType {
    critical_section_from_isr(|cs| unsafe {
        let kernel = KERNEL.get(cs);
        if !RUNNING_SP_SLOT.is_null() {
            *RUNNING_SP_SLOT = sp;
        }
        kernel.switch_context();
        match kernel.current_stack_slot() {
            Some(slot) => {
                RUNNING_SP_SLOT = slot;
                *slot
            }
            None => {
                RUNNING_SP_SLOT = ptr::null_mut();
                ptr::null_mut()
            }
        }
    })
}

/// PendSV exception handler - performs full context switch
///
/// 1. Save R4-R11, LR to current task's PSP (skip if first task)
/// 2. Call pendsv_switch_context to pick the next task
/// 3. Restore R4-R11, LR from new task's stack
/// 4. Exception return
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "dsb",
        "isb",

        "mrs r0, psp",

        "ldr r1, ={slot}",
        "ldr r1, [r1]",
        "cbz r1, 1f",

        "stmdb r0!, {{r4-r11, lr}}",

        "sub r0, r0, #4",

        "1:",
        "bl pendsv_switch_context",

        "cbz r0, 2f",
        "add r0, r0, #4",
        "ldmia r0!, {{r4-r11, lr}}",

        "msr psp, r0",

        "2:",
        "cpsie i",
        "dsb",
        "isb",

        "bx lr",

        slot = sym RUNNING_SP_SLOT,
    );
}

/// SysTick exception handler - advances the kernel tick
#[cortex_m_rt::exception]
fn SysTick() {
    crate::time::os_tick_handler();
}

/// Sleep with SysTick reprogrammed for up to `expected` ticks
///
/// Returns the whole ticks that elapsed; a tick that completes the sleep
/// is left to the pending SysTick interrupt.
pub fn suppress_ticks_and_sleep(expected: TickType, mode: SleepMode) -> TickType {
    let per_tick = TICK_RELOAD.load(Ordering::Relaxed);
    if per_tick == 0 || mode == SleepMode::Abort {
        return 0;
    }
    let mut syst = unsafe { cortex_m::Peripherals::steal() }.SYST;

    let max_ticks = SYSTICK_MAX_RELOAD / per_tick;
    let ticks = (expected as u32).clamp(1, max_ticks);

    cortex_m::interrupt::disable();
    syst.disable_counter();
    let sleep_reload = SYST::get_current() + per_tick * (ticks - 1);
    syst.set_reload(sleep_reload);
    syst.clear_current();
    syst.enable_counter();

    cortex_m::asm::dsb();
    cortex_m::asm::wfi();
    cortex_m::asm::isb();

    syst.disable_counter();
    let completed = if syst.has_wrapped() {
        ticks - 1
    } else {
        (sleep_reload - SYST::get_current()) / per_tick
    };

    syst.set_reload(per_tick - 1);
    syst.clear_current();
    syst.enable_counter();
    unsafe { cortex_m::interrupt::enable() };

    completed as TickType
}

/// NVIC priority of the active external interrupt
///
/// `None` in thread mode or a system exception.
pub fn active_interrupt_priority() -> Option<u8> {
    let exception = active_exception();
    if exception < 16 {
        return None;
    }
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    Some(nvic.ipr[(exception - 16) as usize].read())
}

/// Landing pad for a task function that returns
#[no_mangle]
fn task_exit_error() -> ! {
    crate::error!("task returned from its entry function");
    loop {
        cortex_m::asm::wfi();
    }
}
