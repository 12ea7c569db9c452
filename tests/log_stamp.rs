//! Log timestamps follow the kernel tick
//!
//! Kept in its own test binary: the stamp is process-wide, and the unit
//! tests tick many kernels in parallel.

use tickos::port::StubPort;
use tickos::time::log_tick;
use tickos::Kernel;

fn entry(_: *mut ()) -> ! {
    loop {
        std::hint::spin_loop();
    }
}

#[test]
fn test_log_tick_tracks_kernel_tick() {
    let mut k = Kernel::new(StubPort::new());
    let idle = Box::leak(vec![0; 64].into_boxed_slice());
    k.start(idle, entry, core::ptr::null_mut()).unwrap();

    k.on_tick();
    k.on_tick();
    assert_eq!(log_tick(), 2);

    k.sched.step_tick(40).unwrap();
    assert_eq!(log_tick(), 42);

    k.sched.scheduler_suspend();
    k.on_tick();
    assert_eq!(log_tick(), 42);
    k.sched.scheduler_resume();
    assert_eq!(log_tick(), k.sched.tick_count());
}
