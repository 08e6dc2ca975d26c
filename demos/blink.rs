//! Blink Example - LED blinking using RTOS on STM32F401

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use rtkernel::time::os_delay_ms;
use rtkernel::{os_task_create, Timer, TimerHandle};

#[cfg(feature = "pac")]
use stm32_metapac as pac;

static HEARTBEATS: AtomicU32 = AtomicU32::new(0);

// ============ LED Control ============

#[cfg(feature = "pac")]
fn led_init() {
    pac::RCC.ahb1enr().modify(|w| w.set_gpioaen(true));
    pac::GPIOA.moder().modify(|w| w.set_moder(5, pac::gpio::vals::Moder::OUTPUT));
    pac::GPIOA.otyper().modify(|w| w.set_ot(5, pac::gpio::vals::Ot::PUSHPULL));
}

#[cfg(feature = "pac")]
fn led_on() { pac::GPIOA.bsrr().write(|w| w.set_bs(5, true)); }

#[cfg(feature = "pac")]
fn led_off() { pac::GPIOA.bsrr().write(|w| w.set_br(5, true)); }

#[cfg(not(feature = "pac"))]
fn led_init() {}
#[cfg(not(feature = "pac"))]
fn led_on() {}
#[cfg(not(feature = "pac"))]
fn led_off() {}

// ============ Tasks ============

fn blink_task(_: *mut ()) -> ! {
    rtkernel::info!("Blink task started");
    loop {
        led_on();
        rtkernel::info!("LED ON");
        let _ = os_delay_ms(500);

        led_off();
        rtkernel::info!("LED OFF");
        let _ = os_delay_ms(500);
    }
}

/// Runs in the timer daemon once a second
fn heartbeat(_timer: TimerHandle) {
    let n = HEARTBEATS.fetch_add(1, Ordering::Relaxed) + 1;
    rtkernel::info!("heartbeat #{=u32}", n);
}

// ============ Main ============

#[entry]
fn main() -> ! {
    led_init();

    rtkernel::os_init().expect("OS init failed");

    os_task_create(blink_task, "Blink", 512, core::ptr::null_mut(), 5).expect("Blink task failed");

    let beat = Timer::new("Beat", 1000, true, 0, heartbeat).expect("timer create failed");
    // Queued until the daemon starts with the scheduler
    beat.start(rtkernel::Wait::NONE).expect("timer start failed");

    rtkernel::info!("Starting RTOS");
    rtkernel::os_start().expect("OS start failed");

    loop { cortex_m::asm::nop(); }
}
