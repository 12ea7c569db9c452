//! Cortex-M4 port implementation
//!
//! Context switching via the PendSV exception handler, the tick from
//! SysTick. Both handlers call back into the kernel registered with
//! [`Port::attach`].

#![allow(named_asm_labels)]

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use crate::config::CFG_TICK_RATE_HZ;
use crate::core::cs_cell::CsCell;
use crate::critical::critical_section;
use crate::port::{Dispatch, KernelHooks, Port};
use crate::task::{OsTaskFn, TaskHandle};
use crate::types::OsStkElement;

/// Kernel the exception handlers call into
static HOOKS: CsCell<Option<&'static dyn KernelHooks>> = CsCell::new(None);

#[inline(always)]
fn hooks() -> Option<&'static dyn KernelHooks> {
    critical_section(|cs| *HOOKS.borrow_mut(cs))
}

/// Cortex-M4 port: owns SysTick and decides task residency
pub struct CortexM4 {
    syst: SYST,
    core_clock_hz: u32,
    loader: Option<fn(TaskHandle) -> Dispatch>,
}

impl CortexM4 {
    /// # Arguments
    /// * `syst` - The SysTick peripheral, configured on start
    /// * `core_clock_hz` - Core clock feeding SysTick
    pub fn new(syst: SYST, core_clock_hz: u32) -> Self {
        Self {
            syst,
            core_clock_hz,
            loader: None,
        }
    }

    /// Consult `loader` before each dispatch, for tasks whose code is
    /// paged in on demand
    pub fn with_loader(mut self, loader: fn(TaskHandle) -> Dispatch) -> Self {
        self.loader = Some(loader);
        self
    }

    fn systick_init(&mut self) {
        let reload = self.core_clock_hz / CFG_TICK_RATE_HZ;
        self.syst.set_reload(reload - 1);
        self.syst.clear_current();
        self.syst.set_clock_source(SystClkSource::Core);
        self.syst.enable_interrupt();
        self.syst.enable_counter();
    }
}

/// Exception frame plus the callee-saved registers PendSV stacks
#[repr(C, align(4))]
struct SwitchFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    exc_return: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

const FRAME_WORDS: usize = 17;

impl Port for CortexM4 {
    unsafe fn init_stack(
        &mut self,
        stk_base: *mut OsStkElement,
        stk_size: usize,
        entry: OsTaskFn,
        arg: *mut (),
    ) -> *mut OsStkElement {
        unsafe {
            let stk_top = stk_base.add(stk_size);
            let stk_aligned = ((stk_top as usize) & !7) as *mut u32;
            let frame = stk_aligned.sub(FRAME_WORDS) as *mut SwitchFrame;

            frame.write(SwitchFrame {
                r4: 0x0404_0404,
                r5: 0x0505_0505,
                r6: 0x0606_0606,
                r7: 0x0707_0707,
                r8: 0x0808_0808,
                r9: 0x0909_0909,
                r10: 0x1010_1010,
                r11: 0x1111_1111,
                // Thread mode, process stack, no FPU frame
                exc_return: 0xFFFF_FFFD,
                r0: arg as u32,
                r1: 0,
                r2: 0,
                r3: 0,
                r12: 0,
                lr: task_return as *const () as u32,
                pc: (entry as usize as u32) | 1,
                xpsr: 0x0100_0000,
            });

            // PendSV adds one word back before restoring
            (frame as *mut u32).sub(1)
        }
    }

    #[inline(always)]
    fn request_yield(&mut self) {
        SCB::set_pendsv();
    }

    fn try_dispatch(&mut self, task: TaskHandle) -> Dispatch {
        match self.loader {
            Some(loader) => loader(task),
            None => Dispatch::Ready,
        }
    }

    fn attach(&mut self, hooks: &'static dyn KernelHooks) {
        critical_section(|cs| {
            HOOKS.replace(cs, Some(hooks));
        });
    }

    fn start_first_task(&mut self) {
        unsafe {
            let mut scb = cortex_m::Peripherals::steal().SCB;
            // Switch and tick run below every other interrupt
            scb.set_priority(SystemHandler::PendSV, 0xF0);
            scb.set_priority(SystemHandler::SysTick, 0xF0);

            // A null PSP tells PendSV there is no context to save
            asm!("msr psp, {0}", in(reg) 0u32);
        }
        self.systick_init();
        SCB::set_pendsv();
    }
}

/// Called from PendSV with the outgoing task's stack pointer; returns the
/// incoming task's.
#[inline(never)]
#[no_mangle]
unsafe extern "C" fn pendsv_switch_context(cur_sp: *mut u32) -> *mut u32 {
    match hooks() {
        Some(kernel) => kernel.switch_context(cur_sp),
        None => cur_sp,
    }
}

/// PendSV exception handler - performs full context switch
///
/// 1. Save R4-R11, LR to the current task's PSP (skipped on the first switch)
/// 2. Ask the kernel for the next task
/// 3. Restore R4-R11, LR from the new task's stack
/// 4. Exception return
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "dsb",
        "isb",

        "mrs r0, psp",
        "cbz r0, 1f",

        "stmdb r0!, {{r4-r11, lr}}",
        "sub r0, r0, #4",

        "1:",
        "bl pendsv_switch_context",

        "cbz r0, 2f",
        "add r0, r0, #4",
        "ldmia r0!, {{r4-r11, lr}}",

        "msr psp, r0",

        "2:",
        "cpsie i",
        "dsb",
        "isb",

        "bx lr",
    );
}

/// SysTick interrupt handler
#[no_mangle]
pub extern "C" fn SysTick() {
    if let Some(kernel) = hooks() {
        kernel.tick();
    }
}

/// Landing pad for a task entry that returns
#[no_mangle]
fn task_return() -> ! {
    crate::error!("task returned from its entry point");
    loop {
        cortex_m::asm::wfi();
    }
}
