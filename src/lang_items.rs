//! Panic handlers and default fault handler for bare-metal builds

#[cfg(all(feature = "defmt", target_os = "none"))]
use defmt_rtt as _;

#[cfg(all(feature = "defmt", target_os = "none"))]
use panic_probe as _;

#[cfg(all(feature = "defmt", target_os = "none"))]
#[defmt::panic_handler]
fn defmt_panic() -> ! {
    cortex_m::asm::udf()
}

// Halt on panic when no logger is linked
#[cfg(all(not(feature = "defmt"), target_os = "none"))]
use panic_halt as _;

#[cfg(target_os = "none")]
#[cortex_m_rt::exception]
unsafe fn HardFault(ef: &cortex_m_rt::ExceptionFrame) -> ! {
    crate::error!("hard fault at pc={=u32:#x}", ef.pc());
    loop {
        cortex_m::asm::udf();
    }
}

#[cfg(all(feature = "defmt", target_os = "none"))]
defmt::timestamp!("{=u32}", crate::core::kernel::FLAGS.tick_get());
