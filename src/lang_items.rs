//! Panic handlers and fault handlers
//!
//! Every fatal kernel condition ends in a panic, so the panic handler is
//! where the firmware image halts.

#[cfg(all(feature = "defmt", target_arch = "arm"))]
use defmt_rtt as _;

#[cfg(all(feature = "defmt", target_arch = "arm"))]
use panic_probe as _;

#[cfg(all(not(feature = "defmt"), target_arch = "arm"))]
use panic_halt as _;

// panic-probe prints the message over RTT, then traps here
#[cfg(all(feature = "defmt", target_arch = "arm"))]
#[defmt::panic_handler]
fn defmt_panic() -> ! {
    cortex_m::asm::udf()
}

/// An illegal CPU exception reaching the port layer halts the image.
#[cfg(target_arch = "arm")]
#[cortex_m_rt::exception]
unsafe fn HardFault(ef: &cortex_m_rt::ExceptionFrame) -> ! {
    crate::error!("hard fault: pc={=u32:#x} lr={=u32:#x}", ef.pc(), ef.lr());
    let _ = ef;
    loop {
        cortex_m::asm::udf();
    }
}

// Log lines carry the kernel tick
#[cfg(all(feature = "defmt", target_arch = "arm"))]
defmt::timestamp!("{=u32}", crate::time::log_tick());
