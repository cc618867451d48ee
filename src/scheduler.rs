//! The thread table, priority-queue-backed scheduler, and the
//! timer-tick path that drives both preemption and the signal
//! post-scheduling hook.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;

use heapless::Vec as HVec;

use spin::Mutex;

use crate::contracts::AddressSpace;
use crate::error::{KError, KResult};
use crate::pqueue::PriorityQueue;
use crate::signal::ksiginfo::KSigInfo;
use crate::signal::ops::{self, SenderInfo};
use crate::signal::posthook::{self, PostHookOutcome};
use crate::signal::state::SignalState;
use crate::signal::SigParam;
use crate::thread::{Priority, ProcessId, ThreadFlags, ThreadId, ThreadRecord};
use crate::time::timer::TimerWheel;
use crate::time::{calc_load, load_freq, scale_load, FEXP_1, FEXP_15, FEXP_5, FIXED_1};

const MAX_THREADS: usize = 32;

/// Default platform timer rate this port is tuned for (BCM2835 system
/// timer driven at 100 Hz).
pub const DEFAULT_TICK_HZ: u32 = 100;

/// The single scheduler instance. Assumes one CPU with interrupt
/// masking for mutual exclusion.
pub static SCHEDULER: SchedulerCell = SchedulerCell::new(DEFAULT_TICK_HZ);

/// Distinguished return value for `create_thread` when the table is full.
pub const NO_THREAD: KError = KError::NoResources;

/// What happened this tick, reported back to the caller so it knows
/// whether to redirect the outgoing user frame.
pub enum TickOutcome {
    /// No thread was runnable; the idle path should run.
    Idle,
    /// `tid` is next; no signal was delivered this pass.
    Continue { tid: ThreadId },
    /// `tid` is next, and its outgoing frame must be rewritten to enter
    /// a signal handler.
    Deliver { tid: ThreadId, entry: posthook::UserFrame },
}

pub struct Scheduler {
    threads: [Option<ThreadRecord>; MAX_THREADS],
    /// Next never-yet-used slot; bumped until the table fills, after
    /// which ids only come from `free_ids`.
    next_fresh: usize,
    /// Freed slot ids, reused LIFO. Bounded by `MAX_THREADS` the same
    /// way the thread table itself is — never grows past the table.
    free_ids: HVec<usize, MAX_THREADS>,

    pq: PriorityQueue<Priority>,
    current: Option<usize>,

    timers: TimerWheel,
    tick: u64,
    tick_hz: u32,

    loadavg: [i64; 3],
    load_sample_countdown: u32,
}

pub struct SchedulerCell(UnsafeCell<Scheduler>);

unsafe impl Sync for SchedulerCell {}

impl SchedulerCell {
    pub const fn new(tick_hz: u32) -> Self {
        SchedulerCell(UnsafeCell::new(Scheduler::new(tick_hz)))
    }

    /// # Safety
    /// Returns a mutable reference to the scheduler. Callers must
    /// ensure mutual exclusion themselves (this crate assumes a single
    /// CPU with interrupt masking).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get(&self) -> &mut Scheduler {
        &mut *self.0.get()
    }
}

impl Scheduler {
    pub const fn new(tick_hz: u32) -> Self {
        Scheduler {
            threads: [const { None }; MAX_THREADS],
            next_fresh: 0,
            free_ids: HVec::new(),
            pq: PriorityQueue::new(),
            current: None,
            timers: TimerWheel::new(),
            tick: 0,
            tick_hz,
            loadavg: [0, 0, 0],
            load_sample_countdown: 0,
        }
    }

    fn alloc_slot(&mut self) -> Option<usize> {
        if let Some(slot) = self.free_ids.pop() {
            return Some(slot);
        }
        if self.next_fresh < MAX_THREADS {
            let slot = self.next_fresh;
            self.next_fresh += 1;
            return Some(slot);
        }
        None
    }

    /// Allocate a new thread in the given process at the given
    /// priority. Returns `NO_THREAD` if the table is full.
    pub fn create_thread(&mut self, owner_pid: ProcessId, priority: Priority) -> KResult<ThreadId> {
        let Some(slot) = self.alloc_slot() else {
            log::warn!("create_thread: thread table exhausted (pid {})", owner_pid.0);
            return Err(NO_THREAD);
        };
        let tid = ThreadId(slot);
        let record = ThreadRecord::new(tid, owner_pid, priority);
        self.threads[slot] = Some(record);
        // A reused slot may still carry its predecessor's stale,
        // re-keyed-to-Error heap entry if no scheduling pass ran between
        // `terminate` and this call; drop it so the slot never appears
        // twice in the heap.
        self.pq.remove(slot);
        self.pq.insert(slot, priority);
        log::debug!("create_thread: {tid} (pid {}) at {priority:?}", owner_pid.0);
        Ok(tid)
    }

    fn slot(&self, tid: ThreadId) -> KResult<&ThreadRecord> {
        self.threads
            .get(tid.0)
            .and_then(|t| t.as_ref())
            .filter(|t| t.flags.contains(ThreadFlags::IN_USE))
            .ok_or(KError::InvalidArgument)
    }

    fn slot_mut(&mut self, tid: ThreadId) -> KResult<&mut ThreadRecord> {
        self.threads
            .get_mut(tid.0)
            .and_then(|t| t.as_mut())
            .filter(|t| t.flags.contains(ThreadFlags::IN_USE))
            .ok_or(KError::InvalidArgument)
    }

    /// Mark a thread dead; its slot is garbage-collected lazily the
    /// next time the scheduler walks past it.
    pub fn terminate(&mut self, tid: ThreadId) -> KResult<()> {
        let rec = self.slot_mut(tid)?;
        rec.flags = ThreadFlags::empty();
        rec.priority = Priority::Error;
        self.pq.increase_key(tid.0, Priority::Error);
        let _ = self.free_ids.push(tid.0);
        log::debug!("terminate: {tid} marked for lazy GC, id queued for reuse");
        Ok(())
    }

    pub fn set_priority(&mut self, tid: ThreadId, priority: Priority) -> KResult<()> {
        if priority == Priority::Error {
            return Err(KError::InvalidArgument);
        }
        let rec = self.slot_mut(tid)?;
        let old = rec.priority;
        rec.priority = priority;
        rec.default_priority = priority;
        if priority > old {
            self.pq.increase_key(tid.0, priority);
        } else {
            self.pq.decrease_key(tid.0, priority);
        }
        Ok(())
    }

    pub fn get_priority(&self, tid: ThreadId) -> KResult<Priority> {
        Ok(self.slot(tid)?.priority)
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current.map(ThreadId)
    }

    /// Give up the rest of the current time slice without changing
    /// priority.
    pub fn yield_current(&mut self) -> KResult<()> {
        if let Some(slot) = self.current {
            if let Some(rec) = self.threads[slot].as_mut() {
                rec.ts_counter = 0;
            }
        }
        Ok(())
    }

    /// Block for `ms` milliseconds; only a timer, not a signal, can
    /// resume this thread.
    pub fn sleep_current(&mut self, ms: u32) -> KResult<()> {
        let slot = self.current.ok_or(KError::InvalidArgument)?;
        let delay_ticks = ms_to_ticks(ms, self.tick_hz);
        let rec = self.threads[slot].as_mut().ok_or(KError::InvalidArgument)?;
        rec.flags.remove(ThreadFlags::RUNNABLE);
        rec.flags.insert(ThreadFlags::NO_SIGNAL_WAKEUP);
        self.timers.arm(ThreadId(slot), self.tick, delay_ticks);
        Ok(())
    }

    /// Block for `ms` milliseconds, but a matching signal can resume it
    /// too (`NO_SIGNAL_WAKEUP` is left clear).
    pub fn wait_current(&mut self, ms: u32) -> KResult<()> {
        let slot = self.current.ok_or(KError::InvalidArgument)?;
        let delay_ticks = ms_to_ticks(ms, self.tick_hz);
        let rec = self.threads[slot].as_mut().ok_or(KError::InvalidArgument)?;
        rec.flags.remove(ThreadFlags::RUNNABLE);
        self.timers.arm(ThreadId(slot), self.tick, delay_ticks);
        Ok(())
    }

    /// The current 1/5/15-minute load averages, scaled ×100 and rounded.
    pub fn get_loadavg(&self) -> (u32, u32, u32) {
        (
            scale_load(self.loadavg[0]).max(0) as u32,
            scale_load(self.loadavg[1]).max(0) as u32,
            scale_load(self.loadavg[2]).max(0) as u32,
        )
    }

    /// The thread's shared signal state, for the syscall surface
    /// (`signal`/`action`/`sigmask`/`sigwait`/...) which only ever needs
    /// `&Mutex<SignalState>`, never the rest of the thread record.
    pub fn signal_state(&self, tid: ThreadId) -> KResult<Arc<Mutex<SignalState>>> {
        Ok(self.slot(tid)?.signals.clone())
    }

    pub fn owner_pid(&self, tid: ThreadId) -> KResult<ProcessId> {
        Ok(self.slot(tid)?.owner_pid)
    }

    /// Tick-path step 1 (spec §4.2): the platform's interrupt entry
    /// records the interrupted thread's user stack pointer here before
    /// calling [`Scheduler::on_timer_tick`].
    pub fn save_user_sp(&mut self, tid: ThreadId, sp: usize) -> KResult<()> {
        self.slot_mut(tid)?.user_sp = sp;
        Ok(())
    }

    /// Tick-path step 7: the platform's interrupt return path restores
    /// whatever this holds for the thread `on_timer_tick` selected
    /// (already updated in place if a handler was delivered).
    pub fn user_sp(&self, tid: ThreadId) -> KResult<usize> {
        Ok(self.slot(tid)?.user_sp)
    }

    pub fn is_runnable(&self, tid: ThreadId) -> bool {
        self.slot(tid).map(|t| t.flags.contains(ThreadFlags::RUNNABLE)).unwrap_or(false)
    }

    /// Set or clear `IN_SYSCALL`, as the syscall-entry/exit path would.
    pub fn set_in_syscall(&mut self, tid: ThreadId, in_syscall: bool) -> KResult<()> {
        let rec = self.slot_mut(tid)?;
        if in_syscall {
            rec.flags.insert(ThreadFlags::IN_SYSCALL);
        } else {
            rec.flags.remove(ThreadFlags::IN_SYSCALL);
        }
        Ok(())
    }

    /// Set a thread runnable again (used by the caller driving a
    /// `sigwait`/`sigtimedwait` wakeup once it has consumed
    /// `sigwait_retval`).
    pub fn mark_runnable(&mut self, tid: ThreadId) -> KResult<()> {
        let rec = self.slot_mut(tid)?;
        rec.flags.insert(ThreadFlags::RUNNABLE);
        Ok(())
    }

    pub fn exit_siginfo(&self, tid: ThreadId) -> KResult<Option<KSigInfo>> {
        Ok(self.slot(tid)?.exit_siginfo)
    }

    pub fn take_sigwait_retval(&mut self, tid: ThreadId) -> KResult<Option<KSigInfo>> {
        Ok(self.slot_mut(tid)?.sigwait_retval.take())
    }

    /// `pkill`/`tkill` (spec §4.3.3 / §6) against a thread this
    /// scheduler owns: wraps [`ops::sendsig`] against the thread's own
    /// record, then finishes the fatal fast path's "otherwise terminate
    /// it immediately" step (spec §4.3.3) by running this scheduler's
    /// own lazy-GC termination, which `ops::sendsig` itself cannot do
    /// since it only ever sees a `&mut ThreadRecord`, not the table.
    pub fn send_signal(
        &mut self,
        sender: SenderInfo,
        tid: ThreadId,
        signo: u8,
        param: SigParam,
        is_main_thread: bool,
        dump_core: impl FnMut() -> bool,
    ) -> KResult<()> {
        let is_current = self.current == Some(tid.0);
        let rec = self.slot_mut(tid)?;
        ops::sendsig(sender, signo, param, rec, is_main_thread, is_current, dump_core)?;

        let fatal_immediately =
            rec.exit_siginfo.is_some() && !rec.flags.contains(ThreadFlags::IN_SYSCALL);
        if fatal_immediately {
            log::debug!("send_signal: {tid} terminating immediately after fatal signal {signo}");
            self.terminate(tid)?;
        }
        Ok(())
    }

    /// Process→thread forwarding pass (spec §4.3.4) against every
    /// thread this scheduler owns for process `pid`. Places at most one
    /// signal per call, per [`ops::forward_proc_signals_curproc`].
    pub fn forward_process_signals(
        &mut self,
        process_signals: &Mutex<SignalState>,
        pid: ProcessId,
    ) -> bool {
        let mut refs: Vec<&mut ThreadRecord> = self
            .threads
            .iter_mut()
            .filter_map(|slot| slot.as_mut())
            .filter(|t| t.owner_pid == pid && t.flags.contains(ThreadFlags::IN_USE))
            .collect();
        ops::forward_proc_signals_curproc(process_signals, &mut refs)
    }

    /// Mirrors `calc_loads`'s own countdown: load averages are sampled
    /// every `LOAD_FREQ` ticks regardless of anything else happening
    /// that tick, counting down from `LOAD_FREQ` and resetting on
    /// underflow.
    fn sample_loadavg_if_due(&mut self) {
        if self.load_sample_countdown == 0 {
            self.load_sample_countdown = load_freq(self.tick_hz);
            // `calc_load` expects fixed-point input, same as the original's
            // `active_threads = priority_queue.size * FIXED_1` (sched.c:223).
            let n = self.pq.len() as i64 * FIXED_1;
            self.loadavg[0] = calc_load(self.loadavg[0], FEXP_1, n);
            self.loadavg[1] = calc_load(self.loadavg[1], FEXP_5, n);
            self.loadavg[2] = calc_load(self.loadavg[2], FEXP_15, n);
            log::trace!("load average resampled: n={n} loadavg={:?}", self.loadavg);
        } else {
            self.load_sample_countdown -= 1;
        }
    }

    fn wake_timed_out(&mut self) {
        for tid in self.timers.expire(self.tick) {
            if let Some(rec) = self.threads[tid.0].as_mut() {
                rec.flags.insert(ThreadFlags::RUNNABLE | ThreadFlags::IN_USE);
                rec.flags.remove(ThreadFlags::NO_SIGNAL_WAKEUP);
            }
        }
    }

    /// Pick the next runnable thread, lazily garbage-collecting dead
    /// entries and applying the time-slice penalty along the way.
    fn pick_next(&mut self) -> Option<usize> {
        loop {
            let slot = self.pq.peek_max()?;
            let schedulable = self.threads[slot].as_ref().map(|t| t.is_schedulable()).unwrap_or(false);
            if !schedulable {
                self.pq.delete_max();
                continue;
            }

            let rec = self.threads[slot].as_mut().unwrap();
            let penalizable = rec.priority < Priority::Realtime && rec.priority > Priority::Low;
            if rec.ts_counter <= 0 && penalizable {
                log::debug!("pick_next: {} exhausted its slice, penalizing to Low", rec.id);
                rec.priority = Priority::Low;
                rec.ts_counter = Priority::Low.initial_time_slice();
                self.pq.reschedule_root(Priority::Low);
                continue;
            }
            return Some(slot);
        }
    }

    /// The scheduler's interrupt entry. `user_sp` is the interrupted
    /// thread's saved user stack pointer; the caller must have already
    /// written it into the outgoing thread's record before calling
    /// this. `usigret`/`address_space` feed the post-scheduling hook.
    pub fn on_timer_tick(
        &mut self,
        usigret_for: impl Fn(ProcessId) -> usize,
        address_space: &dyn AddressSpace,
        mut raise_fatal_sigill: impl FnMut(ProcessId, i32),
        process_signals_for: impl Fn(ProcessId) -> Option<Arc<Mutex<SignalState>>>,
    ) -> TickOutcome {
        self.tick += 1;
        self.wake_timed_out();

        let Some(slot) = self.pick_next() else {
            self.current = None;
            return TickOutcome::Idle;
        };
        self.current = Some(slot);

        let owner_pid = self.threads[slot].as_ref().unwrap().owner_pid;
        if let Some(proc_sigs) = process_signals_for(owner_pid) {
            self.forward_process_signals(&proc_sigs, owner_pid);
        }

        let rec = self.threads[slot].as_mut().unwrap();
        rec.ts_counter -= 1;
        let tid = rec.id;
        let user_sp = rec.user_sp;
        let in_syscall = rec.flags.contains(ThreadFlags::IN_SYSCALL);

        let outcome = posthook::run(
            &rec.signals,
            in_syscall,
            user_sp,
            usigret_for(owner_pid),
            address_space,
            |code| raise_fatal_sigill(owner_pid, code),
        );

        self.sample_loadavg_if_due();

        match outcome {
            PostHookOutcome::Delivered { entry } => TickOutcome::Deliver { tid, entry },
            PostHookOutcome::SigwaitResolved(info) => {
                let rec = self.threads[slot].as_mut().unwrap();
                rec.sigwait_retval = Some(info);
                rec.flags.insert(ThreadFlags::RUNNABLE);
                TickOutcome::Continue { tid }
            }
            PostHookOutcome::NoAction | PostHookOutcome::StackFault => TickOutcome::Continue { tid },
        }
    }
}

fn ms_to_ticks(ms: u32, tick_hz: u32) -> u64 {
    (ms as u64 * tick_hz as u64) / 1000
}
