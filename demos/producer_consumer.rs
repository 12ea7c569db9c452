//! Producer-Consumer demo with a queue and a semaphore
//!
//! The producer pushes a counter into a queue every 200 ms. The consumer
//! outranks it and blocks on the queue, so every item is taken as soon as
//! it lands. Every fifth item the consumer gives a semaphore that wakes a
//! low-priority reporter.
//!
//! Output goes over semihosting. Build for a Cortex-M4 target with
//! `--features demo`.

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use cortex_m_semihosting::hprintln;
use tickos::port::CortexM4;
use tickos::time::ms_to_ticks;
use tickos::{OsStkElement, QueueHandle, Rtos, SemaphoreHandle, CFG_IDLE_STK_SIZE, WAIT_FOREVER};

const CORE_CLOCK_HZ: u32 = 16_000_000;

static RTOS: Rtos<CortexM4> = Rtos::new();

static PRODUCED: AtomicU32 = AtomicU32::new(0);
static CONSUMED: AtomicU32 = AtomicU32::new(0);

struct Channels {
    items: QueueHandle,
    report: SemaphoreHandle,
}

static mut CHANNELS: Option<Channels> = None;

static mut PRODUCER_STK: [OsStkElement; 256] = [0; 256];
static mut CONSUMER_STK: [OsStkElement; 256] = [0; 256];
static mut REPORTER_STK: [OsStkElement; 256] = [0; 256];
static mut IDLE_STK: [OsStkElement; CFG_IDLE_STK_SIZE] = [0; CFG_IDLE_STK_SIZE];

fn channels(arg: *mut ()) -> &'static Channels {
    unsafe { &*(arg as *const Channels) }
}

fn producer_task(arg: *mut ()) -> ! {
    let ch = channels(arg);
    loop {
        let n = PRODUCED.fetch_add(1, Ordering::Relaxed) + 1;
        if RTOS.queue_send(ch.items, &n.to_le_bytes(), ms_to_ticks(50)).is_err() {
            hprintln!("[P] queue full, dropped #{}", n);
        }
        RTOS.task_delay(ms_to_ticks(200));
    }
}

fn consumer_task(arg: *mut ()) -> ! {
    let ch = channels(arg);
    let mut buf = [0u8; 4];
    loop {
        if RTOS.queue_receive(ch.items, &mut buf, WAIT_FOREVER).is_ok() {
            let n = CONSUMED.fetch_add(1, Ordering::Relaxed) + 1;
            hprintln!("[C] consumed #{}", u32::from_le_bytes(buf));
            if n % 5 == 0 {
                let _ = RTOS.semaphore_give(ch.report);
            }
        }
    }
}

fn reporter_task(arg: *mut ()) -> ! {
    let ch = channels(arg);
    loop {
        if RTOS.semaphore_take(ch.report, WAIT_FOREVER).is_ok() {
            hprintln!(
                "[R] tick {}: produced {}, consumed {}",
                RTOS.tick_count(),
                PRODUCED.load(Ordering::Relaxed),
                CONSUMED.load(Ordering::Relaxed)
            );
        }
    }
}

#[entry]
fn main() -> ! {
    hprintln!("Producer-Consumer Demo");

    let cp = cortex_m::Peripherals::take().expect("peripherals taken");
    RTOS.init(CortexM4::new(cp.SYST, CORE_CLOCK_HZ))
        .expect("kernel init failed");

    let ch = unsafe {
        CHANNELS.insert(Channels {
            items: RTOS.queue_create(4, 4).expect("queue create failed"),
            report: RTOS.semaphore_create(false),
        })
    };
    let arg = ch as *mut Channels as *mut ();

    unsafe {
        RTOS.task_create("P", producer_task, arg, 2, &mut PRODUCER_STK)
            .expect("producer create failed");
        RTOS.task_create("C", consumer_task, arg, 3, &mut CONSUMER_STK)
            .expect("consumer create failed");
        RTOS.task_create("R", reporter_task, arg, 1, &mut REPORTER_STK)
            .expect("reporter create failed");
    }

    hprintln!("Starting...");
    RTOS.start(unsafe { &mut IDLE_STK }).expect("start failed");

    loop {
        cortex_m::asm::wfi();
    }
}
