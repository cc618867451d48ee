//! The post-scheduling hook (spec §4.3.5): runs against the
//! selected-to-run thread on every schedule, and may rewrite its
//! outgoing user stack frame so it enters a signal handler instead of
//! resuming the interrupted instruction.
//!
//! Stack munging needs two things this crate does not own: the exact
//! register-frame layout (an ABI detail that belongs to the platform
//! glue, out of scope per spec §1) and safe user-memory access
//! (`contracts::AddressSpace`). `UserFrame` below is the narrow,
//! platform-neutral shape this crate actually needs to push/pop — a
//! fixed bundle of words big enough to hold a return PC, link register,
//! stack pointer, three argument registers, and a scratch slot used to
//! remember the pre-push frame for `sigreturn`.

use crate::contracts::AddressSpace;
use crate::error::{KError, KResult};
use spin::Mutex;

use super::action::{evaluate, Evaluation};
use super::ksiginfo::{KSigInfo, ILL_BADSTK};
use super::state::{SignalFlags, SignalState};

/// Word count of a munged frame: pc, lr, sp, r0, r1, r2, scratch.
pub const FRAME_WORDS: usize = 7;

/// The outgoing user register frame, as far as this crate needs to see
/// it. Real field meanings (which register bank, calling convention)
/// are the platform's business; this crate only ever pushes, rewrites,
/// and pops it as a block of words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserFrame {
    pub pc: usize,
    pub lr: usize,
    pub sp: usize,
    pub r0: usize,
    pub r1: usize,
    pub r2: usize,
    /// Scratch word carrying the address of the pre-push frame, so
    /// `sigreturn` knows where to pop back to.
    pub scratch: usize,
}

impl UserFrame {
    fn to_words(self) -> [usize; FRAME_WORDS] {
        [self.pc, self.lr, self.sp, self.r0, self.r1, self.r2, self.scratch]
    }

    fn from_words(w: [usize; FRAME_WORDS]) -> Self {
        UserFrame {
            pc: w[0],
            lr: w[1],
            sp: w[2],
            r0: w[3],
            r1: w[4],
            r2: w[5],
            scratch: w[6],
        }
    }

    fn to_bytes(self) -> [u8; FRAME_WORDS * core::mem::size_of::<usize>()] {
        let words = self.to_words();
        let mut out = [0u8; FRAME_WORDS * core::mem::size_of::<usize>()];
        for (i, w) in words.iter().enumerate() {
            let bytes = w.to_le_bytes();
            out[i * core::mem::size_of::<usize>()..(i + 1) * core::mem::size_of::<usize>()]
                .copy_from_slice(&bytes);
        }
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let word_size = core::mem::size_of::<usize>();
        let mut words = [0usize; FRAME_WORDS];
        for (i, w) in words.iter_mut().enumerate() {
            let mut buf = [0u8; core::mem::size_of::<usize>()];
            buf.copy_from_slice(&bytes[i * word_size..(i + 1) * word_size]);
            *w = usize::from_le_bytes(buf);
        }
        UserFrame::from_words(words)
    }
}

pub const FRAME_BYTES: usize = FRAME_WORDS * core::mem::size_of::<usize>();

/// What the hook decided for this schedule (spec §4.3.5 step 5-7).
pub enum PostHookOutcome {
    /// Nothing to do: lock contention, not interruptible while in a
    /// syscall, no deliverable signal, or the selected signal was
    /// dropped/postponed in place.
    NoAction,
    /// Step 4's "blocked and in wait" branch resolved a pending
    /// `sigwait`; the caller should wake the thread with this value.
    SigwaitResolved(KSigInfo),
    /// A handler was selected and the outgoing frame was munged; this
    /// replaces the thread's saved register frame entirely (spec
    /// §4.3.5 step 6: pc = handler, lr = `usigret`, r0/r1 = signum and
    /// siginfo pointer, sp = post-push top of stack).
    Delivered { entry: UserFrame },
    /// The user stack push faulted; a fatal `SIGILL`/`ILL_BADSTK` has
    /// been raised against the process and delivery was aborted.
    StackFault,
}

/// Run steps 2-7 of the post-scheduling hook against one thread. Step 1
/// (process→thread forwarding) is the caller's responsibility — it
/// needs the whole thread list, not just this one record — via
/// [`super::ops::forward_proc_signals_curproc`].
///
/// `raise_fatal_sigill` is invoked, with `ILL_BADSTK`, if the stack push
/// faults; it is expected to enqueue a fatal `SIGILL` against the
/// owning process (spec: "send a fatal SIGILL ... to the process").
pub fn run(
    signals: &Mutex<SignalState>,
    in_syscall: bool,
    user_sp: usize,
    usigret: usize,
    address_space: &dyn AddressSpace,
    mut raise_fatal_sigill: impl FnMut(i32),
) -> PostHookOutcome {
    let Some(mut state) = signals.try_lock() else {
        return PostHookOutcome::NoAction;
    };

    if in_syscall && !state.flags.contains(SignalFlags::INTERRUPTIBLE) {
        return PostHookOutcome::NoAction;
    }

    let pending: alloc::vec::Vec<KSigInfo> = state.pending_iter().copied().collect();
    let mut selected: Option<(KSigInfo, usize)> = None;

    for info in pending {
        if state.running.contains(info.signo) {
            state.running.remove(info.signo);
            continue;
        }
        let blocked = state.is_blocked(info.signo);
        let waiting = state.wait.contains(info.signo);
        if blocked && waiting {
            state.wait.clear();
            state.flags.remove(SignalFlags::INTERRUPTIBLE);
            let resolved = state.remove_first(info.signo).unwrap_or(info);
            return PostHookOutcome::SigwaitResolved(resolved);
        }
        if blocked {
            continue;
        }

        let action = state.actions.get(info.signo);
        match evaluate(action) {
            Evaluation::Drop => {
                state.remove_first(info.signo);
                state.flags.remove(SignalFlags::INTERRUPTIBLE);
                return PostHookOutcome::NoAction;
            }
            Evaluation::Postpone => continue,
            Evaluation::Deliver(addr) => {
                selected = Some((info, addr));
                break;
            }
        }
    }

    let Some((info, handler_addr)) = selected else {
        return PostHookOutcome::NoAction;
    };

    match push_frame_and_siginfo(user_sp, usigret, &info, handler_addr, address_space) {
        Ok(entry) => {
            state.remove_first(info.signo);
            state.running.insert(info.signo);
            state.flags.insert(SignalFlags::SIGHANDLER);
            state.flags.remove(SignalFlags::INTERRUPTIBLE);
            log::trace!("post-scheduling hook: delivering signal {} to handler {handler_addr:#x}", info.signo);
            PostHookOutcome::Delivered { entry }
        }
        Err(e) => {
            log::error!("post-scheduling hook: user stack push for signal {} faulted ({e:?}), raising SIGILL/ILL_BADSTK", info.signo);
            raise_fatal_sigill(ILL_BADSTK);
            PostHookOutcome::StackFault
        }
    }
}

/// Push the interrupted frame and the `siginfo_t` onto the user stack,
/// and build the entry frame that redirects execution into the handler
/// (spec §4.3.5 step 6). `scratch` on the returned frame holds the
/// address the pushed frame now lives at, for `sigreturn` to pop.
fn push_frame_and_siginfo(
    user_sp: usize,
    usigret: usize,
    info: &KSigInfo,
    handler_addr: usize,
    address_space: &dyn AddressSpace,
) -> KResult<UserFrame> {
    // siginfo_t is serialized compactly: a fixed record the handler's
    // trampoline decodes before calling the registered function, in a
    // layout the platform's libc stub owns. This crate only needs to
    // reserve and fill the bytes, not interpret them back.
    const SIGINFO_BYTES: usize = 32;

    let interrupted = UserFrame {
        pc: 0,
        lr: 0,
        sp: user_sp,
        r0: 0,
        r1: 0,
        r2: 0,
        scratch: user_sp,
    };

    let after_frame = user_sp.checked_sub(FRAME_BYTES).ok_or(KError::NoResources)?;
    if !address_space.useracc(after_frame, FRAME_BYTES, true) {
        return Err(KError::PermissionDenied);
    }
    address_space.copyout(&interrupted.to_bytes(), after_frame)?;

    let after_siginfo = after_frame.checked_sub(SIGINFO_BYTES).ok_or(KError::NoResources)?;
    if !address_space.useracc(after_siginfo, SIGINFO_BYTES, true) {
        return Err(KError::PermissionDenied);
    }
    let mut siginfo_bytes = [0u8; SIGINFO_BYTES];
    siginfo_bytes[0] = info.signo;
    address_space.copyout(&siginfo_bytes, after_siginfo)?;

    Ok(UserFrame {
        pc: handler_addr,
        lr: usigret,
        sp: after_siginfo,
        r0: info.signo as usize,
        r1: after_siginfo,
        r2: 0,
        scratch: after_frame,
    })
}

/// `sigreturn` (spec §4.3.8): pop the previously pushed frame back into
/// the outgoing register frame. `frame_addr` is the `scratch` value the
/// entry frame carried, pointing at where `push_frame_and_siginfo` left
/// the interrupted frame.
pub fn sigreturn(frame_addr: usize, address_space: &dyn AddressSpace) -> KResult<UserFrame> {
    let mut bytes = [0u8; FRAME_BYTES];
    address_space.copyin(frame_addr, &mut bytes)?;
    Ok(UserFrame::from_bytes(&bytes))
}
