//! Signal operations: enqueue, process→thread forwarding, the wait
//! family, mask changes, and fork reinit (spec §4.3.3 – §4.3.4,
//! §4.3.6 – §4.3.7, §4.3.10).
//!
//! These are free functions over `ThreadRecord` and `SignalState`
//! rather than methods on a not-yet-selected scheduler type: the
//! scheduler supplies a `&mut ThreadRecord` (its thread-table slot) and
//! these functions only ever touch the fields spec §3 names, so they
//! stay usable regardless of how the table itself is stored.

use alloc::vec::Vec;

use crate::error::{KError, KResult};
use crate::thread::{ThreadFlags, ThreadRecord};
use spin::Mutex;

use super::action::Action;
use super::ksiginfo::{default_disposition, is_valid_signum, KSigInfo, SigDisposition, SigParam, CLD_KILLED};
use super::sigset::SigSet;
use super::state::{SignalFlags, SignalState};

/// Identity of whoever is sending a signal, copied into the resulting
/// `ksiginfo` (spec §3, "ksiginfo").
#[derive(Debug, Clone, Copy)]
pub struct SenderInfo {
    pub tid: usize,
    pub pid: usize,
    pub uid: u32,
}

/// How `sigsmask` should combine the caller's set with the current
/// block mask (spec §4.3.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskHow {
    Block,
    SetMask,
    Unblock,
}

/// `sendsig` / `queue_sig` (spec §4.3.3), generalized over which
/// `SignalState` the signal is queued into.
///
/// The original's `struct signals` can be owned by either a thread or
/// a process (spec §3); when it is process-owned, the fatal fast path
/// and the runnable-flag manipulation still act on a *thread* — the
/// process's main thread — even though the pending queue being checked
/// and appended to is the process's own. `sigs` is that queue/mask/
/// action owner; `repr` is the thread whose `exit_siginfo`/flags are
/// touched. For a thread-targeted send (`tkill`) the two coincide and
/// callers use [`sendsig`] instead of this directly.
///
/// `is_main_thread` and `dump_core` are only consulted on the fatal
/// fast path with `CORE` in the default disposition. `dump_core`
/// returns whether the dump succeeded (spec: "on success upgrade
/// `si_code = CLD_DUMPED`"). `is_current` controls whether `exec_cond`
/// runs at all (spec: "if the target thread is not the current
/// thread").
pub fn sendsig_to(
    sender: SenderInfo,
    signo: u8,
    param: SigParam,
    sigs: &Mutex<SignalState>,
    repr: &mut ThreadRecord,
    is_main_thread: bool,
    is_current: bool,
    mut dump_core: impl FnMut() -> bool,
) -> KResult<()> {
    if !is_valid_signum(signo) {
        return Err(KError::InvalidArgument);
    }

    let mut info = KSigInfo::new(signo);
    info.sender_tid = sender.tid;
    info.sender_pid = sender.pid;
    info.sender_uid = sender.uid;
    info.code = param.code;
    info.errno = param.errno;
    info.addr = param.addr;
    info.status = param.status;
    info.value = param.value;

    let (action, in_wait, blocked) = {
        let state = sigs.lock();
        if state.running.contains(signo) {
            return Ok(());
        }
        let action = state.actions.get(signo);
        if action.action == Action::Ign {
            return Ok(());
        }
        (action, state.wait.contains(signo), state.is_blocked(signo))
    };

    if action.action == Action::Dfl {
        let dfl = default_disposition(signo);
        if dfl.contains(SigDisposition::KILL) && !in_wait {
            info.code = CLD_KILLED;
            let mut fatal_info = info;

            if dfl.contains(SigDisposition::CORE) && is_main_thread && dump_core() {
                fatal_info.code = super::ksiginfo::CLD_DUMPED;
            }

            repr.exit_siginfo = Some(fatal_info);

            if repr.flags.contains(ThreadFlags::IN_SYSCALL) {
                log::debug!("sendsig: {} fatally signalled (sig {signo}) while in a syscall, deferring to syscall exit", repr.id);
                repr.signals.lock().flags.insert(SignalFlags::SA_KILL);
            } else {
                log::debug!("sendsig: {} fatally signalled (sig {signo}), terminating", repr.id);
                repr.flags.remove(ThreadFlags::RUNNABLE);
            }
            return Ok(());
        }
    }

    sigs.lock().queue(info);

    if !is_current && ((blocked && in_wait) || !blocked) {
        repr.flags.insert(ThreadFlags::RUNNABLE);
    }

    Ok(())
}

/// `sendsig` targeting a single thread directly (`tkill`, and any
/// internal sender whose target owns its own `SignalState`): `sigs`
/// and `repr` coincide.
pub fn sendsig(
    sender: SenderInfo,
    signo: u8,
    param: SigParam,
    target: &mut ThreadRecord,
    is_main_thread: bool,
    is_current: bool,
    dump_core: impl FnMut() -> bool,
) -> KResult<()> {
    let sigs = target.signals.clone();
    sendsig_to(sender, signo, param, &sigs, target, is_main_thread, is_current, dump_core)
}

/// Process→thread forwarding pass (spec §4.3.4). Places at most one
/// signal per call; returns whether a signal was placed. `threads`
/// should list every thread belonging to the current process.
pub fn forward_proc_signals_curproc(
    process_signals: &Mutex<SignalState>,
    threads: &mut [&mut ThreadRecord],
) -> bool {
    let candidates: Vec<KSigInfo> = process_signals.lock().pending_iter().copied().collect();

    for candidate in candidates {
        for thread in threads.iter_mut() {
            let (blocked, waiting) = {
                let tstate = thread.signals.lock();
                (tstate.is_blocked(candidate.signo), tstate.wait.contains(candidate.signo))
            };
            let placeable = (blocked && waiting) || !blocked;
            if !placeable {
                continue;
            }

            let mut proc_state = process_signals.lock();
            let Some(moved) = proc_state.remove_first(candidate.signo) else {
                // Already claimed by a concurrent forwarding pass.
                continue;
            };
            drop(proc_state);

            thread.signals.lock().queue(moved);
            thread.flags.insert(ThreadFlags::RUNNABLE);
            return true;
        }
    }
    false
}

/// Outcome of starting a `sigwait`/`sigtimedwait` (spec §4.3.6).
pub enum SigwaitOutcome {
    /// A matching signal was already pending; here it is.
    Immediate(KSigInfo),
    /// Nothing pending; the caller must block the thread and mark it
    /// `INTERRUPTIBLE` until woken.
    MustBlock,
}

/// Install `set` into the thread's `wait` mask and look for an
/// already-pending match. Forwarding must have already run against the
/// owning process before this is called (spec: "trigger a
/// process→thread forwarding pass").
pub fn sigwait_begin(signals: &Mutex<SignalState>, set: SigSet) -> SigwaitOutcome {
    let mut state = signals.lock();
    state.wait = set;
    match state.take_awaited() {
        Some(info) => {
            state.wait = SigSet::empty();
            SigwaitOutcome::Immediate(info)
        }
        None => {
            state.flags.insert(SignalFlags::INTERRUPTIBLE);
            SigwaitOutcome::MustBlock
        }
    }
}

/// Called when a blocked `sigwait` wakes (either a matching signal
/// arrived via the post-scheduling hook, or — for `sigtimedwait` — the
/// timer expired). Clears `wait` and consumes `sigwait_retval`, mirroring
/// what the post-scheduling hook already set on the thread record.
pub fn sigwait_finish(signals: &Mutex<SignalState>) {
    let mut state = signals.lock();
    state.wait = SigSet::empty();
    state.flags.remove(SignalFlags::INTERRUPTIBLE);
}

/// `sigsleep(timeout)` (spec §4.3.6): returns `Some(remaining)`
/// immediately if a pending, unblocked, non-default/non-ignored signal
/// is already deliverable (excluding `SIGMTX`); otherwise `None`,
/// meaning the caller must arm a timer, mark `INTERRUPTIBLE`, and block.
pub fn sigsleep_check(signals: &Mutex<SignalState>) -> bool {
    let state = signals.lock();
    state.pending_iter().any(|info| {
        if info.signo == super::ksiginfo::SIGMTX {
            return false;
        }
        if state.is_blocked(info.signo) {
            return false;
        }
        !matches!(state.actions.get(info.signo).action, Action::Dfl | Action::Ign)
    })
}

/// `sigsmask` (spec §4.3.7). Returns the mask as it was before applying
/// `how`/`set`.
pub fn sigsmask(signals: &Mutex<SignalState>, how: MaskHow, set: SigSet) -> SigSet {
    let mut state = signals.lock();
    let old = state.block;
    state.block = match how {
        MaskHow::Block => old.union(set),
        MaskHow::SetMask => set,
        MaskHow::Unblock => old.difference(set),
    };
    old
}

/// Syscall-exit signal handling (spec §4.3.9). Returns `true` if the
/// thread must be torn down instead of returning to user space.
pub fn syscall_exit(signals: &Mutex<SignalState>) -> SyscallExitAction {
    let mut state = signals.lock();
    state.flags.remove(SignalFlags::INTERRUPTIBLE);
    if state.flags.contains(SignalFlags::SA_KILL) {
        return SyscallExitAction::Terminate;
    }
    if state.flags.contains(SignalFlags::SIGHANDLER) {
        state.flags.remove(SignalFlags::SIGHANDLER);
        return SyscallExitAction::EnterHandler;
    }
    SyscallExitAction::ReturnNormally
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallExitAction {
    ReturnNormally,
    EnterHandler,
    Terminate,
}

/// Fork semantics (spec §4.3.10): pending signals are cleared, the
/// action table is deep-cloned, masks carry over.
pub fn fork_reinit(parent: &SignalState) -> SignalState {
    SignalState::fork_reinit(parent)
}
