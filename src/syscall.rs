//! The signal subsystem's user-visible system-call surface (spec §6,
//! "System-call surface (signal subsystem only...)").
//!
//! This is deliberately *not* the syscall dispatch layer: argument
//! copy-in/copy-out, errno translation, and pid/tid → table-slot
//! resolution are the surrounding kernel's job (spec §1 Non-goals).
//! Every function here already takes typed, resolved arguments — a
//! `&mut ThreadRecord`, a `&Mutex<SignalState>` — and returns a
//! [`KResult`], matching how [`crate::signal::ops`] is built. The
//! dispatcher that copies a raw `_pkill_args` struct in from user space
//! and calls [`pkill`] lives outside this crate.

use spin::Mutex;

use crate::error::{KError, KResult};
use crate::signal::action::{Action, KSigAction};
use crate::signal::ksiginfo::{is_valid_signum, KSigInfo};
use crate::signal::ops::{self, MaskHow, SenderInfo, SigwaitOutcome, SyscallExitAction};
use crate::signal::posthook::{self, UserFrame};
use crate::signal::sigset::SigSet;
use crate::signal::state::SignalState;
use crate::thread::ThreadRecord;

/// `pkill(pid, sig)`: send a signal to a process (spec §6).
///
/// `sig == 0` validates the (already-resolved) target without effect —
/// POSIX's "does this pid exist and am I allowed to signal it" probe.
/// The caller is expected to have already done the pid lookup and
/// privilege check (spec: credential check happens before this is
/// reached, via `priv_check`); a failed check should never reach this
/// function, it should be turned into `KError::PermissionDenied` by
/// the caller.
///
/// `process_signals` is the target process's own `SignalState` (spec
/// §3: "Process. Holds its own signal state..."); `main_thread` is its
/// main thread, the representative thread the fatal fast path and
/// runnable-flag manipulation act on (spec §4.3.3). When the sender is
/// signalling its own current process, the caller should immediately
/// follow up with [`ops::forward_proc_signals_curproc`] (spec: "It's a
/// good idea to forward signals now if we sent a signal to ourself").
pub fn pkill(
    sender: SenderInfo,
    sig: u8,
    process_signals: &Mutex<SignalState>,
    main_thread: &mut ThreadRecord,
    is_current_process: bool,
    dump_core: impl FnMut() -> bool,
) -> KResult<()> {
    if sig == 0 {
        return Ok(());
    }
    if !is_valid_signum(sig) {
        return Err(KError::InvalidArgument);
    }
    ops::sendsig_to(
        sender,
        sig,
        Default::default(),
        process_signals,
        main_thread,
        true,
        is_current_process,
        dump_core,
    )
}

/// `tkill(tid, sig)`: send a signal to a single thread (spec §6).
pub fn tkill(
    sender: SenderInfo,
    sig: u8,
    target: &mut ThreadRecord,
    is_current: bool,
    is_main_thread: bool,
    dump_core: impl FnMut() -> bool,
) -> KResult<()> {
    if sig == 0 {
        return Ok(());
    }
    if !is_valid_signum(sig) {
        return Err(KError::InvalidArgument);
    }
    ops::sendsig(sender, sig, Default::default(), target, is_main_thread, is_current, dump_core)
}

/// `signal(num, handler)`: the classic single-argument `signal(3)`,
/// swapping in a bare handler address (or `SIG_DFL`/`SIG_IGN`) and
/// returning the previous one. The original notes this "is not clearly
/// defined to work for multi-threaded processes" and always acts on
/// the calling thread's own signal state; this crate keeps that
/// restriction rather than inventing stronger semantics.
pub fn signal(signals: &Mutex<SignalState>, signum: u8, new_action: Action) -> KResult<Action> {
    if !is_valid_signum(signum) {
        return Err(KError::InvalidArgument);
    }
    let mut state = signals.lock();
    let old = state.actions.get(signum).action;
    if new_action == Action::Ign {
        let mut set = SigSet::empty();
        set.insert(signum);
        state.discard(set);
    }
    state.actions.set(signum, KSigAction { action: new_action });
    Ok(old)
}

/// `action(num, new, old)`: install a full `ksigaction`, returning the
/// one it replaced. Passing `None` for `new` is a pure query.
pub fn action(signals: &Mutex<SignalState>, signum: u8, new: Option<KSigAction>) -> KResult<KSigAction> {
    if !is_valid_signum(signum) {
        return Err(KError::InvalidArgument);
    }
    let mut state = signals.lock();
    let old = state.actions.get(signum);
    if let Some(new) = new {
        if new.action == Action::Ign {
            let mut set = SigSet::empty();
            set.insert(signum);
            state.discard(set);
        }
        state.actions.set(signum, new);
    }
    Ok(old)
}

/// `altstack`: unimplemented in the source this crate is modeled on;
/// always reports not-supported (spec §6).
pub fn altstack() -> KResult<()> {
    Err(KError::NotSupported)
}

/// `sigmask(how, set, oldset, threadmask)` (spec §4.3.7 / §6). Returns
/// the mask as it stood before applying `how`.
pub fn sigmask(signals: &Mutex<SignalState>, how: MaskHow, set: SigSet) -> SigSet {
    ops::sigsmask(signals, how, set)
}

/// `sigwait(set)` (spec §4.3.6 / §6). The caller must have already run
/// a process→thread forwarding pass before this, and must block the
/// thread (scheduler's `wait_current`-style suspension) when this
/// returns [`SigwaitOutcome::MustBlock`].
pub fn sigwait(signals: &Mutex<SignalState>, set: SigSet) -> SigwaitOutcome {
    ops::sigwait_begin(signals, set)
}

/// `sigwaitinfo`/`sigtimedwait(set, timeout)` (spec §4.3.6 / §6): like
/// [`sigwait`], but the caller arms a one-shot timer alongside the
/// block and is expected to report `EAGAIN` if that timer — rather
/// than a matching signal — is what woke the thread.
pub fn sigtimedwait(signals: &Mutex<SignalState>, set: SigSet) -> SigwaitOutcome {
    ops::sigwait_begin(signals, set)
}

/// Outcome of `return` (i.e. `sigreturn`), carrying the register frame
/// the caller should restore verbatim into the outgoing thread.
pub type SigreturnFrame = UserFrame;

/// `return` / `sigreturn` trampoline exit (spec §4.3.8 / §6): pop the
/// frame that was pushed when a handler was entered, so the
/// interrupted instruction resumes. `frame_addr` is the scratch value
/// the entry frame carried.
pub fn sigreturn(
    frame_addr: usize,
    address_space: &dyn crate::contracts::AddressSpace,
) -> KResult<SigreturnFrame> {
    posthook::sigreturn(frame_addr, address_space)
}

/// Syscall-exit signal handling (spec §4.3.9 / §6), run on the way out
/// of *every* syscall, not just the signal ones.
pub fn syscall_exit(signals: &Mutex<SignalState>) -> SyscallExitAction {
    ops::syscall_exit(signals)
}
