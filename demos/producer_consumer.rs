//! Producer-Consumer example with a queue and a counting semaphore

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;
use rtkernel::time::os_delay_ms;
use rtkernel::{os_task_create, Queue, Semaphore, Wait};

static PRODUCED: AtomicU32 = AtomicU32::new(0);
static CONSUMED: AtomicU32 = AtomicU32::new(0);

/// Created in `main` before the scheduler starts, read-only afterwards
static mut ITEMS: Option<Queue<u32>> = None;
static mut BATCHES: Option<Semaphore> = None;

const BATCH: u32 = 10;

fn producer_task(_arg: *mut ()) -> ! {
    let (Some(items), Some(batches)) = (unsafe { ITEMS }, unsafe { BATCHES }) else {
        panic!("objects not created");
    };
    loop {
        let n = PRODUCED.fetch_add(1, Ordering::Relaxed) + 1;
        match items.send(n, Wait::new(100)) {
            Ok(()) => info!("[P] produced #{}", n),
            Err(e) => info!("[P] queue full: {}", e),
        }
        if batches.take(Wait::NONE).is_ok() {
            info!("[P] consumer finished a batch");
        }
        let _ = os_delay_ms(50);
    }
}

fn consumer_task(_arg: *mut ()) -> ! {
    let (Some(items), Some(batches)) = (unsafe { ITEMS }, unsafe { BATCHES }) else {
        panic!("objects not created");
    };
    loop {
        let Ok(n) = items.receive(Wait::FOREVER) else {
            continue;
        };
        let total = CONSUMED.fetch_add(1, Ordering::Relaxed) + 1;
        info!("[C] consumed #{}", n);
        if total % BATCH == 0 {
            let _ = batches.give();
        }
        for _ in 0..10_000 { cortex_m::asm::nop(); }
    }
}

#[entry]
fn main() -> ! {
    info!("Producer-Consumer Demo");

    rtkernel::os_init().expect("OS init failed");
    unsafe {
        ITEMS = Some(Queue::new(8).expect("queue create failed"));
        BATCHES = Some(Semaphore::counting(4, 0).expect("semaphore create failed"));
    }

    // The consumer outranks the producer and drains the queue as items arrive
    os_task_create(producer_task, "P", 256, core::ptr::null_mut(), 1).unwrap();
    os_task_create(consumer_task, "C", 256, core::ptr::null_mut(), 2).unwrap();

    info!("Starting...");
    rtkernel::os_start().expect("OS start failed");

    loop { cortex_m::asm::wfi(); }
}
