//! Priority Inversion Demo - mutex priority inheritance
//!
//! Three tasks: High(3), Med(2), Low(1)
//! Low holds mutex -> High waits -> Low boosted to prio 3

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use cortex_m_semihosting::{debug, hprintln};
use defmt::info;
use rtkernel::{os_delay, os_task_create, Mutex, Wait};

static HIGH_RUNS: AtomicU32 = AtomicU32::new(0);
static LOW_RUNS: AtomicU32 = AtomicU32::new(0);

/// High-task rounds before the demo exits under semihosting
const ROUNDS: u32 = 20;

static mut MTX: Option<Mutex> = None;

fn mtx() -> Mutex {
    match unsafe { MTX } {
        Some(m) => m,
        None => panic!("mutex not created"),
    }
}

/// High priority task (prio=3)
fn high_task_fn(_arg: *mut ()) -> ! {
    let _ = os_delay(50);

    loop {
        let n = HIGH_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        let _ = mtx().lock(Wait::FOREVER);
        info!("[HIGH] acquired #{}", n);

        for _ in 0..1_000 { cortex_m::asm::nop(); }

        let _ = mtx().unlock();
        if n == ROUNDS {
            hprintln!("high ran {} times, low {} times", n, LOW_RUNS.load(Ordering::Relaxed));
            debug::exit(debug::EXIT_SUCCESS);
        }
        let _ = os_delay(100);
    }
}

/// Medium priority task (prio=2) - CPU bound
fn med_task_fn(_arg: *mut ()) -> ! {
    loop {
        for _ in 0..50_000 { cortex_m::asm::nop(); }
        let _ = os_delay(10);
    }
}

/// Low priority task (prio=1) - holds mutex long
fn low_task_fn(_arg: *mut ()) -> ! {
    loop {
        let n = LOW_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        let _ = mtx().lock(Wait::FOREVER);
        info!("[LOW] holding #{}", n);

        for _ in 0..100_000 { cortex_m::asm::nop(); }

        let _ = mtx().unlock();
        let _ = os_delay(200);
    }
}

#[entry]
fn main() -> ! {
    info!("Priority Inversion Demo: H(3) M(2) L(1)");

    rtkernel::os_init().expect("OS init failed");
    unsafe {
        MTX = Some(Mutex::new().unwrap());
    }

    os_task_create(low_task_fn, "L", 256, core::ptr::null_mut(), 1).unwrap();
    os_task_create(med_task_fn, "M", 256, core::ptr::null_mut(), 2).unwrap();
    os_task_create(high_task_fn, "H", 256, core::ptr::null_mut(), 3).unwrap();

    info!("Starting...");
    rtkernel::os_start().expect("OS start failed");

    loop { cortex_m::asm::wfi(); }
}
