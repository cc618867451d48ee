//! One-shot timer wheel driving `sleep_current`, `wait_current`,
//! `sigtimedwait`, and `sigsleep`. Armed in absolute ticks rather than
//! wall-clock time, so expiry is just "has the tick counter reached
//! this value", checked once per scheduler tick.

use alloc::vec::Vec;

use crate::thread::ThreadId;

/// Opaque handle to an armed timer, returned by `arm` and used to
/// cancel it early (e.g. a `sigwait` that woke on a signal instead of
/// timeout should cancel its backing timer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(usize);

#[derive(Debug, Clone, Copy)]
struct Armed {
    owner: ThreadId,
    expires_at_tick: u64,
    live: bool,
}

/// Flat, linearly-scanned set of armed timers. The scheduler's thread
/// table is already bounded (`MAX_THREADS`), and timers are 1:1 with
/// "a thread is currently sleeping/waiting", so a wheel bucketed by
/// tick would add complexity this crate's scale doesn't need.
#[derive(Default)]
pub struct TimerWheel {
    armed: Vec<Armed>,
}

impl TimerWheel {
    pub const fn new() -> Self {
        TimerWheel { armed: Vec::new() }
    }

    /// Arm a one-shot timer for `owner`, expiring at `now_tick +
    /// delay_ticks`.
    pub fn arm(&mut self, owner: ThreadId, now_tick: u64, delay_ticks: u64) -> TimerHandle {
        let expires_at_tick = now_tick.saturating_add(delay_ticks);
        if let Some(slot) = self.armed.iter().position(|a| !a.live) {
            self.armed[slot] = Armed { owner, expires_at_tick, live: true };
            return TimerHandle(slot);
        }
        self.armed.push(Armed { owner, expires_at_tick, live: true });
        TimerHandle(self.armed.len() - 1)
    }

    pub fn cancel(&mut self, handle: TimerHandle) {
        if let Some(a) = self.armed.get_mut(handle.0) {
            a.live = false;
        }
    }

    /// Called once per tick. Returns the threads whose timer expired
    /// this tick, in arming order.
    pub fn expire(&mut self, now_tick: u64) -> Vec<ThreadId> {
        let mut woken = Vec::new();
        for a in self.armed.iter_mut() {
            if a.live && a.expires_at_tick <= now_tick {
                a.live = false;
                woken.push(a.owner);
            }
        }
        woken
    }

    pub fn ticks_remaining(&self, handle: TimerHandle, now_tick: u64) -> u64 {
        self.armed
            .get(handle.0)
            .filter(|a| a.live)
            .map(|a| a.expires_at_tick.saturating_sub(now_tick))
            .unwrap_or(0)
    }
}
