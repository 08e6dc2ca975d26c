//! Unit tests for core RTOS modules
//!
//! These tests run on the host (not embedded target) to verify
//! the core algorithms work correctly.

mod common;

#[cfg(test)]
mod prio_tests {
    use rtkernel::prio::PriorityBitmap;
    use rtkernel::CFG_MAX_PRIORITIES;

    #[test]
    fn test_multiple_priorities() {
        let mut table = PriorityBitmap::new();

        // Insert in random order
        for p in [20, 5, 10, 0, 15] {
            table.insert(p);
        }
        assert_eq!(table.highest(), Some(20));

        // Remove from the top down
        for (removed, next) in [(20, Some(15)), (15, Some(10)), (10, Some(5)), (5, Some(0)), (0, None)] {
            table.remove(removed);
            assert_eq!(table.highest(), next);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_all_priorities() {
        let mut table = PriorityBitmap::new();
        for i in 0..CFG_MAX_PRIORITIES {
            table.insert(i as u8);
        }
        assert_eq!(table.bits(), u32::MAX);

        for i in (0..CFG_MAX_PRIORITIES).rev() {
            assert_eq!(table.highest(), Some(i as u8));
            table.remove(i as u8);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_insert_remove() {
        let mut table = PriorityBitmap::new();

        table.insert(10);
        table.insert(10);
        assert_eq!(table.highest(), Some(10));

        // One bit per band: a single remove empties it
        table.remove(10);
        assert!(!table.is_set(10));
        assert!(table.is_empty());
    }
}

#[cfg(test)]
mod error_tests {
    use rtkernel::KernelError;

    #[test]
    fn test_error_codes_grouped_by_area() {
        assert_eq!(KernelError::InvalidArgument.code(), 1001);
        assert_eq!(KernelError::OutOfMemory.code(), 2001);
        assert_eq!(KernelError::Timeout.code(), 3001);
        assert_eq!(KernelError::IsrMisuse.code(), 4001);
        assert_eq!(KernelError::Configuration.code(), 5001);
        assert_eq!(KernelError::NotSuspended.code(), 6002);
        assert_eq!(KernelError::NotOwner.code(), 7001);
        assert_eq!(KernelError::ObjectInUse.code(), 8004);
    }

    #[test]
    fn test_wait_failures() {
        assert!(KernelError::Timeout.is_wait_failure());
        assert!(KernelError::WouldBlock.is_wait_failure());
        assert!(!KernelError::IsrMisuse.is_wait_failure());
        assert_ne!(KernelError::Timeout, KernelError::WouldBlock);
    }

    #[test]
    fn test_error_debug() {
        let err = KernelError::SchedulerSuspended;
        assert_eq!(format!("{:?}", err), "SchedulerSuspended");
    }
}

#[cfg(test)]
mod types_tests {
    use rtkernel::{Step, TaskName, TaskState, CFG_MAX_TASK_NAME_LEN};

    #[test]
    fn test_task_state_codes() {
        let codes: String = [
            TaskState::Running,
            TaskState::Ready,
            TaskState::Blocked,
            TaskState::Suspended,
            TaskState::Deleted,
        ]
        .iter()
        .map(|s| s.code())
        .collect();
        assert_eq!(codes, "XRBSD");
    }

    #[test]
    fn test_task_name_truncates() {
        assert_eq!(TaskName::new("short").as_str(), "short");
        assert_eq!(TaskName::EMPTY.as_str(), "");

        let long = "a-task-name-that-goes-on-and-on";
        let name = TaskName::new(long);
        assert_eq!(name.as_str().len(), CFG_MAX_TASK_NAME_LEN);
        assert!(long.starts_with(name.as_str()));
    }

    #[test]
    fn test_task_name_keeps_whole_chars() {
        // 15 ASCII bytes then a two-byte char straddling the limit
        let name = TaskName::new("abcdefghijklmnoé");
        assert_eq!(name.as_str(), "abcdefghijklmno");
        assert_eq!(format!("{:?}", name), "abcdefghijklmno");
    }

    #[test]
    fn test_step_helpers() {
        let done: Step<u32> = Step::Done(4);
        let blocked: Step<u32> = Step::Blocked;
        assert!(!done.is_blocked());
        assert!(blocked.is_blocked());
        assert_eq!(done.done(), Some(4));
        assert_eq!(blocked.done(), None);
    }
}

#[cfg(test)]
mod config_tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use rtkernel::{
        Hooks, Kernel, KernelConfig, KernelError, CFG_IDLE_TASK_PRIORITY, CFG_KERNEL_INTERRUPT_PRIORITY,
        CFG_MAX_PRIORITIES, CFG_MAX_SYSCALL_INTERRUPT_PRIORITY, CFG_MINIMAL_STACK_SIZE, CFG_TICK_RATE_HZ,
        CFG_TIMER_TASK_PRIORITY,
    };

    #[test]
    fn test_config_values() {
        assert!(CFG_MAX_PRIORITIES >= 8, "Need at least 8 priority levels");
        assert!(CFG_MAX_PRIORITIES <= 32, "Bitmap holds 32 levels");

        assert!(CFG_MINIMAL_STACK_SIZE >= 32, "Stack too small");

        assert!(CFG_TICK_RATE_HZ >= 10, "Tick rate too slow");
        assert!(CFG_TICK_RATE_HZ <= 10000, "Tick rate too fast");

        // Idle at the bottom, the timer daemon at the top
        assert_eq!(CFG_IDLE_TASK_PRIORITY, 0);
        assert_eq!(CFG_TIMER_TASK_PRIORITY as usize, CFG_MAX_PRIORITIES - 1);
    }

    #[test]
    fn test_ms_to_ticks() {
        let cfg = KernelConfig::DEFAULT;
        assert_eq!(cfg.ms_to_ticks(250), 250);

        let slow = KernelConfig {
            tick_rate_hz: 100,
            ..KernelConfig::DEFAULT
        };
        assert_eq!(slow.ms_to_ticks(25), 2);
        assert_eq!(slow.systick_reload(), 160_000);
    }

    static ASSERTS: AtomicU32 = AtomicU32::new(0);
    fn on_assert(_file: &'static str, _line: u32) {
        ASSERTS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_interrupt_above_syscall_ceiling_asserts() {
        let mut k = crate::common::kernel();
        k.set_hooks(Hooks {
            assert_failed: Some(on_assert),
            ..Hooks::NONE
        });

        k.check_interrupt_priority(None);
        k.check_interrupt_priority(Some(CFG_MAX_SYSCALL_INTERRUPT_PRIORITY));
        k.check_interrupt_priority(Some(CFG_KERNEL_INTERRUPT_PRIORITY));
        assert_eq!(ASSERTS.load(Ordering::SeqCst), 0);

        // Numerically lower is more urgent on the NVIC
        k.check_interrupt_priority(Some(CFG_MAX_SYSCALL_INTERRUPT_PRIORITY - 0x10));
        k.check_interrupt_priority(Some(0));
        assert_eq!(ASSERTS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_bad_config_refused_by_kernel() {
        let cfg = KernelConfig {
            tick_rate_hz: 0,
            ..KernelConfig::DEFAULT
        };
        assert_eq!(cfg.validate(), Err(KernelError::Configuration));
        assert!(matches!(
            Kernel::new(cfg, crate::common::arena(1024)),
            Err(KernelError::Configuration)
        ));
    }
}

#[cfg(test)]
mod heap_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::common::{arena, kernel, kernel_with, spawn, spin};
    use rtkernel::mem::Heap;
    use rtkernel::{Hooks, KernelConfig, KernelError};

    static FAILED_SIZE: AtomicUsize = AtomicUsize::new(0);
    fn on_malloc_failed(size: usize) {
        FAILED_SIZE.store(size, Ordering::SeqCst);
    }

    #[test]
    fn test_minimum_ever_free_tracks_low_water() {
        let mut heap = Heap::new(arena(4096));
        let start = heap.free_bytes();
        let a = heap.allocate(1000).unwrap();
        let low = heap.free_bytes();
        unsafe { heap.free(a).unwrap() };

        assert_eq!(heap.free_bytes(), start);
        assert_eq!(heap.minimum_ever_free(), low);
        heap.reset_minimum_ever_free();
        assert_eq!(heap.minimum_ever_free(), start);
    }

    #[test]
    fn test_task_stacks_come_from_heap() {
        let mut k = kernel();
        let before = k.heap().free_bytes();
        let t = spawn(&mut k, "worker", 1);
        assert!(k.heap().free_bytes() <= before - 128 * 4);
        k.delete_task(Some(t)).unwrap();
        assert_eq!(k.heap().free_bytes(), before);
    }

    #[test]
    fn test_exhaustion_calls_hook() {
        let mut k = kernel();
        k.set_hooks(Hooks {
            malloc_failed: Some(on_malloc_failed),
            ..Hooks::NONE
        });
        let words = 64 * 1024;
        assert_eq!(
            k.create_task(spin, "huge", words, std::ptr::null_mut(), 1),
            Err(KernelError::OutOfMemory)
        );
        assert_eq!(FAILED_SIZE.load(Ordering::SeqCst), words * 4);
    }

    #[test]
    fn test_oversized_stack_depth_rejected() {
        let mut k = kernel();
        let free = k.heap().free_bytes();
        assert_eq!(
            k.create_task(spin, "huge", usize::MAX, std::ptr::null_mut(), 1),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(k.heap().free_bytes(), free);
    }

    #[test]
    fn test_static_only_build_refuses_heap_stacks() {
        let cfg = KernelConfig {
            support_dynamic_allocation: false,
            support_static_allocation: true,
            ..KernelConfig::DEFAULT
        };
        let mut k = kernel_with(cfg);
        assert_eq!(
            k.create_task(spin, "dyn", 128, std::ptr::null_mut(), 1),
            Err(KernelError::Configuration)
        );
    }
}
