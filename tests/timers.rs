//! Software timers and the timer daemon on the host

mod common;

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use common::{advance, kernel, kernel_with, settle, spawn, start};
use rtkernel::{Hooks, KernelConfig, KernelError, Step, TimerHandle, Wait, MAX_DELAY};

fn ignore(_t: TimerHandle) {}

#[cfg(test)]
mod expiry_tests {
    use super::*;

    static PERIODIC: AtomicUsize = AtomicUsize::new(0);
    fn on_periodic(_t: TimerHandle) {
        PERIODIC.fetch_add(1, Ordering::SeqCst);
    }

    static ONE_SHOT: AtomicUsize = AtomicUsize::new(0);
    fn on_one_shot(_t: TimerHandle) {
        ONE_SHOT.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_auto_reload_period_50_over_1000_ticks() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        start(&mut k);

        let t = k.create_timer("periodic", 50, true, 0, on_periodic).unwrap();
        assert_eq!(k.timer_start(t, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);
        assert_eq!(k.timer_is_active(t), Ok(true));
        assert_eq!(k.timer_expiry_time(t), Ok(Some(50)));

        let fired = advance(&mut k, 1000);
        assert_eq!(fired, 20);
        assert_eq!(PERIODIC.load(Ordering::SeqCst), 20);
        assert_eq!(k.timer_is_active(t), Ok(true));
    }

    #[test]
    fn test_one_shot_fires_once() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        start(&mut k);

        let t = k.create_timer("once", 50, false, 0, on_one_shot).unwrap();
        assert_eq!(k.timer_start(t, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);

        assert_eq!(advance(&mut k, 1000), 1);
        assert_eq!(ONE_SHOT.load(Ordering::SeqCst), 1);
        assert_eq!(k.timer_is_active(t), Ok(false));
        assert_eq!(k.timer_expiry_time(t), Ok(None));
    }

    #[test]
    fn test_expiry_on_exact_tick() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        start(&mut k);

        let t = k.create_timer("exact", 7, false, 0, ignore).unwrap();
        assert_eq!(k.timer_start(t, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);

        assert_eq!(advance(&mut k, 6), 0);
        assert_eq!(advance(&mut k, 1), 1);
    }

    #[test]
    fn test_timer_across_tick_wrap() {
        let config = KernelConfig {
            initial_tick_count: MAX_DELAY - 5,
            ..KernelConfig::DEFAULT
        };
        let mut k = kernel_with(config);
        spawn(&mut k, "app", 1);
        start(&mut k);

        let t = k.create_timer("wrap", 10, false, 0, ignore).unwrap();
        assert_eq!(k.timer_start(t, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);
        assert_eq!(k.timer_expiry_time(t), Ok(Some(4)));

        assert_eq!(advance(&mut k, 9), 0);
        assert_eq!(advance(&mut k, 1), 1);
        assert_eq!(k.tick_count(), 4);
    }
}

#[cfg(test)]
mod command_tests {
    use super::*;

    #[test]
    fn test_zero_period_rejected() {
        let mut k = kernel();
        assert_eq!(k.create_timer("bad", 0, false, 0, ignore), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_stop_cancels_expiry() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        start(&mut k);
        let t = k.create_timer("stop", 50, true, 0, ignore).unwrap();
        assert_eq!(k.timer_start(t, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);

        assert_eq!(advance(&mut k, 120), 2);
        assert_eq!(k.timer_stop(t, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);
        assert_eq!(k.timer_is_active(t), Ok(false));
        assert_eq!(advance(&mut k, 200), 0);
    }

    #[test]
    fn test_reset_pushes_expiry_back() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        start(&mut k);
        let t = k.create_timer("reset", 50, false, 0, ignore).unwrap();
        assert_eq!(k.timer_start(t, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);

        assert_eq!(advance(&mut k, 30), 0);
        assert_eq!(k.timer_reset(t, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);
        assert_eq!(k.timer_expiry_time(t), Ok(Some(80)));

        assert_eq!(advance(&mut k, 49), 0);
        assert_eq!(advance(&mut k, 1), 1);
    }

    #[test]
    fn test_change_period_restarts_timer() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        start(&mut k);
        let t = k.create_timer("period", 100, true, 0, ignore).unwrap();
        assert_eq!(k.timer_start(t, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);

        advance(&mut k, 10);
        assert_eq!(k.timer_change_period(t, 20, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);
        assert_eq!(k.timer_period(t), Ok(20));
        assert_eq!(k.timer_expiry_time(t), Ok(Some(30)));

        // Expiries at 30, 50, 70, 90, 110
        assert_eq!(advance(&mut k, 100), 5);
        assert_eq!(
            k.timer_change_period(t, 0, &mut Wait::NONE),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn test_change_period_starts_dormant_timer() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        start(&mut k);
        let t = k.create_timer("dormant", 100, false, 0, ignore).unwrap();
        assert_eq!(k.timer_is_active(t), Ok(false));

        assert_eq!(k.timer_change_period(t, 5, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);
        assert_eq!(k.timer_is_active(t), Ok(true));
        assert_eq!(advance(&mut k, 5), 1);
    }

    #[test]
    fn test_delete_frees_slot() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        start(&mut k);
        let t = k.create_timer("gone", 10, true, 0, ignore).unwrap();
        assert_eq!(k.timer_start(t, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);

        assert_eq!(k.timer_delete(t, &mut Wait::NONE), Ok(Step::Done(())));
        settle(&mut k);
        assert_eq!(k.timer_is_active(t), Err(KernelError::InvalidHandle));
        assert_eq!(advance(&mut k, 50), 0);
    }

    #[test]
    fn test_timer_table_capacity() {
        let mut k = kernel();
        let mut made = 0;
        while k.create_timer("t", 10, false, 0, ignore).is_ok() {
            made += 1;
        }
        assert_eq!(made, rtkernel::CFG_MAX_TIMERS);
        assert_eq!(k.create_timer("t", 10, false, 0, ignore), Err(KernelError::NoFreeSlot));
    }

    #[test]
    fn test_start_from_isr_wakes_daemon() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        start(&mut k);
        let t = k.create_timer("isr", 10, false, 0, ignore).unwrap();

        k.isr_enter();
        let woken = k.timer_start_from_isr(t).unwrap();
        k.isr_exit(woken);
        assert!(woken);
        settle(&mut k);
        assert_eq!(k.timer_is_active(t), Ok(true));
    }

    #[test]
    fn test_timer_attributes() {
        let mut k = kernel();
        let t = k.create_timer("attrs", 10, false, 7, ignore).unwrap();
        assert_eq!(k.timer_name(t), Ok("attrs"));
        assert_eq!(k.timer_id(t), Ok(7));
        k.set_timer_id(t, 9).unwrap();
        assert_eq!(k.timer_id(t), Ok(9));
        assert_eq!(k.timer_auto_reload(t), Ok(false));
        k.set_timer_auto_reload(t, true).unwrap();
        assert_eq!(k.timer_auto_reload(t), Ok(true));
    }

    #[test]
    fn test_commands_queued_before_start() {
        let mut k = kernel();
        let t = k.create_timer("early", 10, false, 0, ignore).unwrap();
        // The command waits in the queue until the daemon first runs
        assert_eq!(k.timer_start(t, &mut Wait::NONE), Ok(Step::Done(())));
        spawn(&mut k, "app", 1);
        start(&mut k);
        assert_eq!(k.timer_is_active(t), Ok(true));
        assert_eq!(advance(&mut k, 10), 1);
    }
}

#[cfg(test)]
mod daemon_tests {
    use super::*;

    static PENDED: AtomicU32 = AtomicU32::new(0);
    fn pended(_param: *mut (), value: u32) {
        PENDED.store(value, Ordering::SeqCst);
    }

    static STARTUPS: AtomicUsize = AtomicUsize::new(0);
    fn on_startup() {
        STARTUPS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_pended_call_runs_in_daemon() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        start(&mut k);

        let step = k.pend_function_call(pended, std::ptr::null_mut(), 0xBEEF, &mut Wait::NONE);
        assert_eq!(step, Ok(Step::Done(())));
        assert_eq!(PENDED.load(Ordering::SeqCst), 0);
        settle(&mut k);
        assert_eq!(PENDED.load(Ordering::SeqCst), 0xBEEF);
    }

    #[test]
    fn test_startup_hook_runs_once() {
        let mut k = kernel();
        k.set_hooks(Hooks {
            daemon_startup: Some(on_startup),
            ..Hooks::NONE
        });
        spawn(&mut k, "app", 1);
        start(&mut k);
        advance(&mut k, 10);
        assert_eq!(STARTUPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_daemon_is_a_system_task() {
        let mut k = kernel();
        start(&mut k);
        let daemon = k.timer_daemon_handle().unwrap();
        assert_eq!(k.task_name(Some(daemon)), Ok("Tmr Svc"));
        assert_eq!(k.task_priority(Some(daemon)), Ok(KernelConfig::DEFAULT.timer_task_priority));
        assert_eq!(k.delete_task(Some(daemon)), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_full_command_queue_would_block() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        start(&mut k);
        let t = k.create_timer("busy", 10, false, 0, ignore).unwrap();

        // The daemon cannot run while the scheduler is suspended
        k.suspend_all();
        for _ in 0..KernelConfig::DEFAULT.timer_queue_length {
            assert_eq!(k.timer_start(t, &mut Wait::NONE), Ok(Step::Done(())));
        }
        assert_eq!(k.timer_start(t, &mut Wait::NONE), Err(KernelError::WouldBlock));
        k.resume_all().unwrap();
        settle(&mut k);
        assert_eq!(k.timer_is_active(t), Ok(true));
    }
}
