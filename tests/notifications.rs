//! Direct-to-task notifications

mod common;

use common::{advance, current, kernel, settle, spawn, start};
use rtkernel::task::{NotifyAction, NotifyState};
use rtkernel::{KernelError, Step, Wait};

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn test_give_then_take_counts_down() {
        let mut k = kernel();
        let a = spawn(&mut k, "a", 2);
        start(&mut k);
        assert_eq!(current(&k), a);

        for _ in 0..3 {
            k.notify_give(a).unwrap();
        }
        assert_eq!(k.notify_take(false, &mut Wait::NONE), Ok(Step::Done(3)));
        assert_eq!(k.notify_take(false, &mut Wait::NONE), Ok(Step::Done(2)));
        assert_eq!(k.notify_take(true, &mut Wait::NONE), Ok(Step::Done(1)));
        assert_eq!(k.notify_take(true, &mut Wait::NONE), Err(KernelError::WouldBlock));
    }

    #[test]
    fn test_take_with_clear_empties_value() {
        let mut k = kernel();
        let a = spawn(&mut k, "a", 2);
        start(&mut k);

        k.notify(a, 7, NotifyAction::SetValueWithOverwrite).unwrap();
        assert_eq!(k.notify_take(true, &mut Wait::NONE), Ok(Step::Done(7)));
        assert_eq!(k.notify_value_clear(None, 0), Ok(0));
    }

    #[test]
    fn test_set_bits_accumulates() {
        let mut k = kernel();
        spawn(&mut k, "a", 2);
        let b = spawn(&mut k, "b", 1);
        start(&mut k);

        assert_eq!(k.notify(b, 0b101, NotifyAction::SetBits), Ok(0));
        assert_eq!(k.notify(b, 0b010, NotifyAction::SetBits), Ok(0b101));
        assert_eq!(k.notify_state(b), Ok(NotifyState::Pending));
        assert_eq!(k.notify(b, 0, NotifyAction::NoAction), Ok(0b111));
        assert_eq!(k.notify(b, 0, NotifyAction::Increment), Ok(0b111));
        assert_eq!(k.notify_value_clear(Some(b), 0), Ok(0b1000));
    }

    #[test]
    fn test_without_overwrite_refuses_unread_value() {
        let mut k = kernel();
        spawn(&mut k, "a", 2);
        let b = spawn(&mut k, "b", 1);
        start(&mut k);

        assert_eq!(k.notify(b, 1, NotifyAction::SetValueWithoutOverwrite), Ok(0));
        assert_eq!(
            k.notify(b, 2, NotifyAction::SetValueWithoutOverwrite),
            Err(KernelError::AlreadyPending)
        );
        assert_eq!(k.notify_value_clear(Some(b), 0), Ok(1));

        assert_eq!(k.notify_state_clear(Some(b)), Ok(true));
        assert_eq!(k.notify_state_clear(Some(b)), Ok(false));
        assert_eq!(k.notify_state(b), Ok(NotifyState::NotWaiting));
        assert_eq!(k.notify(b, 2, NotifyAction::SetValueWithoutOverwrite), Ok(1));
    }

    #[test]
    fn test_value_clear_masks_bits() {
        let mut k = kernel();
        let a = spawn(&mut k, "a", 2);
        start(&mut k);

        k.notify(a, 0xFF, NotifyAction::SetValueWithOverwrite).unwrap();
        assert_eq!(k.notify_value_clear(None, 0x0F), Ok(0xFF));
        assert_eq!(k.notify_value_clear(None, 0), Ok(0xF0));
        // Clearing bits leaves the pending state alone
        assert_eq!(k.notify_state(a), Ok(NotifyState::Pending));
    }
}

#[cfg(test)]
mod wait_tests {
    use super::*;

    #[test]
    fn test_pending_value_returned_with_exit_clear() {
        let mut k = kernel();
        let a = spawn(&mut k, "a", 2);
        start(&mut k);

        k.notify(a, 0xF3, NotifyAction::SetValueWithOverwrite).unwrap();
        // Entry clear is skipped when a notification is already pending
        assert_eq!(k.notify_wait(0xFF, 0x0F, &mut Wait::NONE), Ok(Step::Done(0xF3)));
        assert_eq!(k.notify_value_clear(None, 0), Ok(0xF0));
        assert_eq!(k.notify_state(a), Ok(NotifyState::NotWaiting));
        assert_eq!(k.notify_wait(0, 0, &mut Wait::NONE), Err(KernelError::WouldBlock));
    }

    #[test]
    fn test_blocked_waiter_woken_by_notify() {
        let mut k = kernel();
        let hi = spawn(&mut k, "hi", 3);
        let lo = spawn(&mut k, "lo", 2);
        start(&mut k);

        k.notify(hi, 0xF0, NotifyAction::SetValueWithOverwrite).unwrap();
        k.notify_state_clear(None).unwrap();

        let mut wait = Wait::FOREVER;
        assert_eq!(k.notify_wait(0x30, 0, &mut wait), Ok(Step::Blocked));
        settle(&mut k);
        assert_eq!(current(&k), lo);
        assert_eq!(k.notify_state(hi), Ok(NotifyState::Waiting));

        assert_eq!(k.notify(hi, 0x01, NotifyAction::SetBits), Ok(0xC0));
        settle(&mut k);
        assert_eq!(current(&k), hi);
        assert_eq!(k.notify_wait(0x30, 0, &mut wait), Ok(Step::Done(0xC1)));
    }

    #[test]
    fn test_lower_waiter_does_not_preempt() {
        let mut k = kernel();
        let hi = spawn(&mut k, "hi", 3);
        let lo = spawn(&mut k, "lo", 2);
        start(&mut k);

        // Park hi so lo can wait, then bring hi back
        assert_eq!(k.delay(5), Ok(()));
        settle(&mut k);
        assert_eq!(current(&k), lo);
        let mut wait = Wait::FOREVER;
        assert_eq!(k.notify_take(true, &mut wait), Ok(Step::Blocked));
        settle(&mut k);
        advance(&mut k, 5);
        assert_eq!(current(&k), hi);

        k.notify_give(lo).unwrap();
        settle(&mut k);
        assert_eq!(current(&k), hi);
        assert_eq!(k.notify_state(lo), Ok(NotifyState::Pending));
    }

    #[test]
    fn test_wait_times_out() {
        let mut k = kernel();
        let hi = spawn(&mut k, "hi", 3);
        let lo = spawn(&mut k, "lo", 2);
        start(&mut k);

        let mut wait = Wait::new(10);
        assert_eq!(k.notify_take(true, &mut wait), Ok(Step::Blocked));
        settle(&mut k);
        assert_eq!(current(&k), lo);

        advance(&mut k, 9);
        assert_eq!(current(&k), lo);
        advance(&mut k, 1);
        assert_eq!(current(&k), hi);
        assert_eq!(k.notify_take(true, &mut wait), Err(KernelError::Timeout));
        assert_eq!(k.notify_state(hi), Ok(NotifyState::NotWaiting));
    }

    #[test]
    fn test_give_from_isr_reports_woken() {
        let mut k = kernel();
        let hi = spawn(&mut k, "hi", 3);
        let lo = spawn(&mut k, "lo", 2);
        start(&mut k);

        let mut wait = Wait::FOREVER;
        assert_eq!(k.notify_take(false, &mut wait), Ok(Step::Blocked));
        settle(&mut k);
        assert_eq!(current(&k), lo);

        k.isr_enter();
        let woken = k.notify_give_from_isr(hi).unwrap();
        let (previous, lower_woken) = k.notify_from_isr(lo, 4, NotifyAction::SetValueWithOverwrite).unwrap();
        k.isr_exit(woken);
        assert!(woken);
        assert_eq!(previous, 0);
        assert!(!lower_woken);

        settle(&mut k);
        assert_eq!(current(&k), hi);
        assert_eq!(k.notify_take(false, &mut wait), Ok(Step::Done(1)));
    }

    #[test]
    fn test_blocking_wait_from_isr_rejected() {
        let mut k = kernel();
        spawn(&mut k, "a", 2);
        start(&mut k);

        k.isr_enter();
        assert_eq!(k.notify_take(true, &mut Wait::FOREVER), Err(KernelError::IsrMisuse));
        k.isr_exit(false);
    }
}
