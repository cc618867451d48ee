//! Thin free-function wrappers over the global scheduler for the
//! currently running thread, mirroring the syscalls the surrounding
//! kernel would expose for `yield`/`sleep`/`exit`.

use crate::error::KResult;
use crate::scheduler::SCHEDULER;

/// Give up the rest of the current time slice.
pub fn yield_thread() {
    unsafe {
        let _ = SCHEDULER.get().yield_current();
    }
}

/// `sleep_current(ms)`: blocks until the timer expires; immune to
/// signal wakeups.
pub fn sleep_ms(ms: u32) -> KResult<()> {
    unsafe { SCHEDULER.get().sleep_current(ms) }
}

/// `wait_current(ms)`: blocks until the timer expires or a matching
/// signal arrives.
pub fn wait_ms(ms: u32) -> KResult<()> {
    unsafe { SCHEDULER.get().wait_current(ms) }
}

/// Terminate the calling thread. Never returns.
pub fn exit_thread() -> ! {
    unsafe {
        if let Some(current) = SCHEDULER.get().current() {
            let _ = SCHEDULER.get().terminate(current);
        }
    }
    loop {
        core::hint::spin_loop();
    }
}
