//! Kernel configuration
//!
//! `CFG_*` constants are the compile-time knob panel; [`KernelConfig`]
//! carries the subset that can be chosen per kernel instance.

use crate::error::{KernelError, KernelResult};
use crate::types::{Priority, TickType};

// ============ Scheduler ============

/// Preemptive scheduling
pub const CFG_USE_PREEMPTION: bool = true;

/// Round-robin among equal priorities on each tick
pub const CFG_USE_TIME_SLICING: bool = true;

/// CLZ-based ready lookup (forces 32 priorities)
pub const CFG_USE_PORT_OPTIMISED_TASK_SELECTION: bool = true;

/// Number of priority levels
pub const CFG_MAX_PRIORITIES: usize = 32;

/// Idle task yields to other priority-0 tasks
pub const CFG_IDLE_SHOULD_YIELD: bool = false;

/// Idle task priority
pub const CFG_IDLE_TASK_PRIORITY: Priority = 0;

// ============ Time ============

/// Core clock feeding SysTick
pub const CFG_CPU_CLOCK_HZ: u32 = 16_000_000;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Tickless idle
pub const CFG_USE_TICKLESS_IDLE: bool = false;

/// Shortest idle period worth sleeping through
pub const CFG_EXPECTED_IDLE_TIME_BEFORE_SLEEP: TickType = 2;

/// Tick count at kernel init
pub const CFG_INITIAL_TICK_COUNT: TickType = 0;

// ============ Memory ============

pub const CFG_SUPPORT_DYNAMIC_ALLOCATION: bool = true;
pub const CFG_SUPPORT_STATIC_ALLOCATION: bool = false;

/// Heap arena size in bytes
pub const CFG_TOTAL_HEAP_SIZE: usize = 48 * 1024;

/// Minimal task stack in words (idle task)
pub const CFG_MINIMAL_STACK_SIZE: usize = 128;

/// Task name length, including truncation
pub const CFG_MAX_TASK_NAME_LEN: usize = 16;

/// TCB table capacity
pub const CFG_MAX_TASKS: usize = 16;

/// Queue/semaphore/mutex/set table capacity
pub const CFG_MAX_QUEUES: usize = 16;

/// Software timer table capacity
pub const CFG_MAX_TIMERS: usize = 8;

/// Queue registry entries
pub const CFG_QUEUE_REGISTRY_SIZE: usize = 10;

// ============ Timers ============

pub const CFG_TIMER_TASK_PRIORITY: Priority = (CFG_MAX_PRIORITIES - 1) as Priority;
pub const CFG_TIMER_QUEUE_LENGTH: usize = 10;
pub const CFG_TIMER_TASK_STACK_DEPTH: usize = CFG_MINIMAL_STACK_SIZE * 2;

// ============ Observability ============

pub const CFG_GENERATE_RUN_TIME_STATS: bool = false;
pub const CFG_USE_TRACE_FACILITY: bool = false;
pub const CFG_USE_STATS_FORMATTING_FUNCTIONS: bool = true;

/// Stack overflow check: 0 = off, 1 = pointer, 2 = pointer + pattern
pub const CFG_CHECK_FOR_STACK_OVERFLOW: u8 = 0;

// ============ Interrupts ============

/// Implemented NVIC priority bits
pub const CFG_PRIO_BITS: u8 = 4;

pub const CFG_LIBRARY_LOWEST_INTERRUPT_PRIORITY: u8 = 15;
pub const CFG_LIBRARY_MAX_SYSCALL_INTERRUPT_PRIORITY: u8 = 5;

/// Priority of SysTick and PendSV (lowest)
pub const CFG_KERNEL_INTERRUPT_PRIORITY: u8 =
    nvic_priority(CFG_LIBRARY_LOWEST_INTERRUPT_PRIORITY, CFG_PRIO_BITS);

/// BASEPRI ceiling used by kernel critical sections
pub const CFG_MAX_SYSCALL_INTERRUPT_PRIORITY: u8 =
    nvic_priority(CFG_LIBRARY_MAX_SYSCALL_INTERRUPT_PRIORITY, CFG_PRIO_BITS);

/// Left-justify a library priority level into the 8-bit NVIC field
pub const fn nvic_priority(level: u8, prio_bits: u8) -> u8 {
    level << (8 - prio_bits)
}

/// An interrupt running at `nvic_prio` may call ISR APIs
#[inline]
pub const fn is_syscall_capable(nvic_prio: u8) -> bool {
    nvic_prio >= CFG_MAX_SYSCALL_INTERRUPT_PRIORITY
}

// ============ MCU selection ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuFamily {
    F1,
    F4,
    H7,
    G4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmLibrary {
    Std,
    Hal,
}

pub const CFG_MCU_TYPE: McuFamily = McuFamily::F4;
pub const CFG_STM32_LIB: StmLibrary = StmLibrary::Hal;

/// Vendor device header for a family/library pair
///
/// Only F1 and F4 ship a standard peripheral library.
pub const fn device_header(mcu: McuFamily, lib: StmLibrary) -> Option<&'static str> {
    match (mcu, lib) {
        (McuFamily::F1, StmLibrary::Std) => Some("stm32f10x.h"),
        (McuFamily::F4, StmLibrary::Std) => Some("stm32f4xx.h"),
        (McuFamily::F1, StmLibrary::Hal) => Some("stm32f1xx_hal.h"),
        (McuFamily::F4, StmLibrary::Hal) => Some("stm32f4xx_hal.h"),
        (McuFamily::H7, StmLibrary::Hal) => Some("stm32h7xx_hal.h"),
        (McuFamily::G4, StmLibrary::Hal) => Some("stm32g4xx_hal.h"),
        (McuFamily::H7, StmLibrary::Std) | (McuFamily::G4, StmLibrary::Std) => None,
    }
}

// ============ Per-instance configuration ============

/// Stack overflow detection method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackCheck {
    Off,
    /// Saved stack pointer below the stack base
    Pointer,
    /// Pointer check plus an intact fill pattern at the stack limit
    Pattern,
}

impl StackCheck {
    const fn from_level(level: u8) -> Self {
        match level {
            0 => StackCheck::Off,
            1 => StackCheck::Pointer,
            _ => StackCheck::Pattern,
        }
    }
}

/// Runtime-selectable kernel options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub preemption: bool,
    pub time_slicing: bool,
    pub port_optimised_selection: bool,
    pub max_priorities: usize,
    pub idle_should_yield: bool,
    pub tickless_idle: bool,
    pub expected_idle_time_before_sleep: TickType,
    pub initial_tick_count: TickType,
    pub support_dynamic_allocation: bool,
    pub support_static_allocation: bool,
    pub minimal_stack_size: usize,
    pub stack_check: StackCheck,
    pub generate_run_time_stats: bool,
    pub timer_task_priority: Priority,
    pub timer_queue_length: usize,
    pub timer_task_stack_depth: usize,
    pub cpu_clock_hz: u32,
    pub tick_rate_hz: u32,
    pub mcu: McuFamily,
    pub stm32_lib: StmLibrary,
}

impl KernelConfig {
    pub const DEFAULT: Self = Self {
        preemption: CFG_USE_PREEMPTION,
        time_slicing: CFG_USE_TIME_SLICING,
        port_optimised_selection: CFG_USE_PORT_OPTIMISED_TASK_SELECTION,
        max_priorities: CFG_MAX_PRIORITIES,
        idle_should_yield: CFG_IDLE_SHOULD_YIELD,
        tickless_idle: CFG_USE_TICKLESS_IDLE,
        expected_idle_time_before_sleep: CFG_EXPECTED_IDLE_TIME_BEFORE_SLEEP,
        initial_tick_count: CFG_INITIAL_TICK_COUNT,
        support_dynamic_allocation: CFG_SUPPORT_DYNAMIC_ALLOCATION,
        support_static_allocation: CFG_SUPPORT_STATIC_ALLOCATION,
        minimal_stack_size: CFG_MINIMAL_STACK_SIZE,
        stack_check: StackCheck::from_level(CFG_CHECK_FOR_STACK_OVERFLOW),
        generate_run_time_stats: CFG_GENERATE_RUN_TIME_STATS,
        timer_task_priority: CFG_TIMER_TASK_PRIORITY,
        timer_queue_length: CFG_TIMER_QUEUE_LENGTH,
        timer_task_stack_depth: CFG_TIMER_TASK_STACK_DEPTH,
        cpu_clock_hz: CFG_CPU_CLOCK_HZ,
        tick_rate_hz: CFG_TICK_RATE_HZ,
        mcu: CFG_MCU_TYPE,
        stm32_lib: CFG_STM32_LIB,
    };

    /// Check the options against each other and the compiled capacities
    pub fn validate(&self) -> KernelResult<()> {
        if self.max_priorities == 0 || self.max_priorities > CFG_MAX_PRIORITIES {
            return Err(KernelError::Configuration);
        }
        if self.port_optimised_selection && self.max_priorities != 32 {
            return Err(KernelError::Configuration);
        }
        if !self.support_dynamic_allocation && !self.support_static_allocation {
            return Err(KernelError::Configuration);
        }
        if self.timer_task_priority as usize >= self.max_priorities {
            return Err(KernelError::Configuration);
        }
        if self.timer_queue_length == 0 || self.tick_rate_hz == 0 || self.tick_rate_hz > self.cpu_clock_hz {
            return Err(KernelError::Configuration);
        }
        if self.expected_idle_time_before_sleep < 2 {
            return Err(KernelError::Configuration);
        }
        if device_header(self.mcu, self.stm32_lib).is_none() {
            return Err(KernelError::Configuration);
        }
        Ok(())
    }

    /// SysTick reload value for one tick
    #[inline]
    pub const fn systick_reload(&self) -> u32 {
        self.cpu_clock_hz / self.tick_rate_hz
    }

    /// Convert milliseconds to ticks, rounding down
    #[inline]
    pub const fn ms_to_ticks(&self, ms: u32) -> TickType {
        ((ms as u64 * self.tick_rate_hz as u64) / 1000) as TickType
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nvic_priorities_are_left_justified() {
        assert_eq!(CFG_KERNEL_INTERRUPT_PRIORITY, 0xF0);
        assert_eq!(CFG_MAX_SYSCALL_INTERRUPT_PRIORITY, 0x50);
        assert_eq!(nvic_priority(5, 3), 0xA0);
    }

    #[test]
    fn syscall_range() {
        assert!(is_syscall_capable(0x50));
        assert!(is_syscall_capable(0xF0));
        assert!(!is_syscall_capable(0x40));
        assert!(!is_syscall_capable(0x00));
    }

    #[test]
    fn default_validates() {
        assert_eq!(KernelConfig::DEFAULT.validate(), Ok(()));
        assert_eq!(KernelConfig::DEFAULT.systick_reload(), 16_000);
    }

    #[test]
    fn rejects_inconsistent_settings() {
        let mut cfg = KernelConfig::DEFAULT;
        cfg.max_priorities = 8;
        assert_eq!(cfg.validate(), Err(KernelError::Configuration));
        cfg.port_optimised_selection = false;
        cfg.timer_task_priority = 7;
        assert_eq!(cfg.validate(), Ok(()));

        let mut cfg = KernelConfig::DEFAULT;
        cfg.support_dynamic_allocation = false;
        assert_eq!(cfg.validate(), Err(KernelError::Configuration));

        let mut cfg = KernelConfig::DEFAULT;
        cfg.mcu = McuFamily::H7;
        cfg.stm32_lib = StmLibrary::Std;
        assert_eq!(cfg.validate(), Err(KernelError::Configuration));
    }

    #[test]
    fn device_headers() {
        assert_eq!(device_header(McuFamily::F1, StmLibrary::Std), Some("stm32f10x.h"));
        assert_eq!(device_header(McuFamily::G4, StmLibrary::Hal), Some("stm32g4xx_hal.h"));
    }
}
