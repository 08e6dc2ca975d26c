//! Kernel critical sections
//!
//! Task-level sections raise BASEPRI to the syscall ceiling and nest;
//! interrupts above the ceiling are never masked. ISR-level sections save
//! and restore the previous BASEPRI instead of counting.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::config::CFG_MAX_SYSCALL_INTERRUPT_PRIORITY;

/// Nesting depth of task-level critical sections
static NESTING: AtomicU8 = AtomicU8::new(0);

/// RAII guard for a kernel critical section
///
/// While the guard lives, syscall-capable interrupts are masked.
pub struct CriticalSection {
    /// BASEPRI to restore for ISR sections; `None` for counted task sections
    saved: Option<u8>,
}

impl CriticalSection {
    /// Enter a task-level critical section.
    #[inline(always)]
    pub fn enter() -> Self {
        raise_basepri(CFG_MAX_SYSCALL_INTERRUPT_PRIORITY);
        NESTING.fetch_add(1, Ordering::Acquire);
        CriticalSection { saved: None }
    }

    /// Enter a critical section from an interrupt handler.
    #[inline(always)]
    pub fn enter_from_isr() -> Self {
        let saved = get_basepri();
        raise_basepri(CFG_MAX_SYSCALL_INTERRUPT_PRIORITY);
        CriticalSection { saved: Some(saved) }
    }

    /// Current task-level nesting depth
    #[inline(always)]
    pub fn nesting() -> u8 {
        NESTING.load(Ordering::Acquire)
    }

    /// Check if we're currently in a critical section
    #[inline(always)]
    pub fn is_active() -> bool {
        Self::nesting() > 0 || get_basepri() != 0
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        match self.saved {
            Some(prev) => set_basepri(prev),
            None => {
                if NESTING.fetch_sub(1, Ordering::Release) == 1 {
                    set_basepri(0);
                }
            }
        }
    }
}

/// Execute a closure inside a task-level critical section
///
/// The closure receives the guard, which unlocks [`CsCell`] protected data.
///
/// [`CsCell`]: crate::core::cs_cell::CsCell
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}

/// Execute a closure inside an ISR-level critical section
#[inline]
pub fn critical_section_from_isr<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter_from_isr();
    f(&cs)
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    active_exception() != 0
}

/// Active exception number from IPSR (0 in thread mode)
#[inline]
pub fn active_exception() -> u32 {
    #[cfg(target_arch = "arm")]
    {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr & 0x1FF
    }

    #[cfg(not(target_arch = "arm"))]
    {
        0
    }
}

/// Raise BASEPRI without ever lowering it (`BASEPRI_MAX`)
#[inline]
fn raise_basepri(priority: u8) {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!(
            "msr BASEPRI_MAX, {}",
            "dsb",
            "isb",
            in(reg) priority as u32,
            options(nostack, preserves_flags)
        );
    }

    #[cfg(not(target_arch = "arm"))]
    {
        let _ = priority;
    }
}

/// Mask priority levels using BASEPRI (Cortex-M3/M4/M7)
///
/// Only interrupts whose priority value is >= the mask are blocked.
#[inline]
pub fn set_basepri(priority: u8) {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!(
            "msr BASEPRI, {}",
            in(reg) priority as u32,
            options(nomem, nostack, preserves_flags)
        );
    }

    #[cfg(not(target_arch = "arm"))]
    {
        let _ = priority;
    }
}

/// Get current BASEPRI value
#[inline]
pub fn get_basepri() -> u8 {
    #[cfg(target_arch = "arm")]
    {
        let basepri: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, BASEPRI",
                out(reg) basepri,
                options(nomem, nostack, preserves_flags)
            );
        }
        basepri as u8
    }

    #[cfg(not(target_arch = "arm"))]
    {
        0
    }
}
