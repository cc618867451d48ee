//! Per-owner signal state (spec §3, "Signal state"; spec §4.3).
//!
//! Shared via `Arc<Mutex<SignalState>>` between the thread or process that
//! owns it and any sender currently delivering into it — mirrors how the
//! original keeps a `struct signals` embedded in both `proc` and `thread`
//! and reaches it through either, except here ownership is explicit
//! instead of implied by struct embedding.

use alloc::collections::VecDeque;

use super::action::ActionTable;
use super::ksiginfo::{is_valid_signum, KSigInfo};
use super::sigset::SigSet;

/// Whether a `SignalState` belongs to a single thread or is shared
/// process-wide (spec §3: "owned by either a thread or a process").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOwner {
    Thread,
    Process,
}

bitflags::bitflags! {
    /// Transient per-owner signal flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SignalFlags: u32 {
        /// A user handler is currently executing (stack has been munged
        /// and not yet unwound by `sigreturn`); re-entrant delivery of a
        /// second handler is deferred until it returns.
        const SIGHANDLER    = 0b001;
        /// A fatal signal has been latched for this owner; further
        /// non-fatal signals are dropped rather than queued.
        const SA_KILL        = 0b010;
        /// Owner is blocked in an interruptible wait (`sigwait`-family);
        /// a pending unblocked signal should wake it immediately.
        const INTERRUPTIBLE  = 0b100;
    }
}

/// Full signal-delivery state for one owner (spec §3, "Signal state"):
/// a pending queue, an installed-action table, and the three signal
/// masks (spec §4.3.2).
pub struct SignalState {
    pub owner: SignalOwner,

    /// FIFO of signals awaiting evaluation. A `VecDeque` rather than the
    /// original's linked list so arbitrary entries can be dropped
    /// mid-iteration (e.g. when `sigsmask` unblocks a class of signals
    /// and a postponed `HOLD` entry becomes immediately deliverable)
    /// without the manual prev/next surgery the original needs.
    pending: VecDeque<KSigInfo>,

    pub actions: ActionTable,

    /// Signals currently blocked by the owner (`sigprocmask`-equivalent).
    pub block: SigSet,
    /// Signals the owner is specifically waiting for (`sigwait`).
    pub wait: SigSet,
    /// Signals considered "running": i.e. not blocked and not held
    /// pending behind a `HOLD` action; derived, but cached because the
    /// post-scheduling hook consults it every pass.
    pub running: SigSet,

    pub flags: SignalFlags,
}

impl SignalState {
    pub fn new(owner: SignalOwner) -> Self {
        SignalState {
            owner,
            pending: VecDeque::new(),
            actions: ActionTable::new(),
            block: SigSet::empty(),
            wait: SigSet::empty(),
            running: SigSet::empty(),
            flags: SignalFlags::empty(),
        }
    }

    /// Append a validated signal to the pending queue (spec §4.3.3).
    /// Callers are expected to have already rejected out-of-range
    /// signal numbers and handled the fatal fast path before reaching
    /// here; this just queues.
    pub fn queue(&mut self, info: KSigInfo) {
        debug_assert!(is_valid_signum(info.signo));
        self.pending.push_back(info);
    }

    pub fn is_blocked(&self, signum: u8) -> bool {
        self.block.contains(signum)
    }

    /// True if some pending signal is not currently blocked.
    pub fn has_deliverable(&self) -> bool {
        self.pending.iter().any(|i| !self.block.contains(i.signo))
    }

    /// Take the first pending signal not in `block`, preserving the
    /// relative order of everything left behind (spec §4.3.1: signals
    /// are evaluated oldest-first, skipping blocked ones in place).
    pub fn take_deliverable(&mut self) -> Option<KSigInfo> {
        let idx = self.pending.iter().position(|i| !self.block.contains(i.signo))?;
        self.pending.remove(idx)
    }

    /// Remove and return the first pending signal in `wait`, if any —
    /// used by `sigwait`/`sigtimedwait` (spec §4.3.6).
    pub fn take_awaited(&mut self) -> Option<KSigInfo> {
        let idx = self.pending.iter().position(|i| self.wait.contains(i.signo))?;
        self.pending.remove(idx)
    }

    pub fn pending_iter(&self) -> impl Iterator<Item = &KSigInfo> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Remove and return the first queued instance of `signo`, if any —
    /// used by process→thread forwarding (spec §4.3.4), which moves one
    /// specific pending record rather than filtering by mask.
    pub fn remove_first(&mut self, signo: u8) -> Option<KSigInfo> {
        let idx = self.pending.iter().position(|i| i.signo == signo)?;
        self.pending.remove(idx)
    }

    /// Drop every signal in `set` from the pending queue outright (used
    /// when a signal's action is changed to `Ign` after it was already
    /// queued, per spec §4.3.1: "installing SIG_IGN discards any
    /// already-pending instances of that signal").
    pub fn discard(&mut self, set: SigSet) {
        self.pending.retain(|i| !set.contains(i.signo));
    }

    /// Reinitialize for a freshly forked owner (spec §4.3.10): the
    /// action table is deep-copied by the caller beforehand and passed
    /// in here; the pending queue is cleared and masks reset to the
    /// parent's, since a forked child inherits no in-flight signals.
    pub fn fork_reinit(parent: &SignalState) -> SignalState {
        SignalState {
            owner: parent.owner,
            pending: VecDeque::new(),
            actions: parent.actions.clone_deep(),
            block: parent.block,
            wait: SigSet::empty(),
            running: parent.running,
            flags: SignalFlags::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ksiginfo::{SIGTERM, SIGUSR1, SIGUSR2};

    #[test]
    fn queue_and_take_respects_block_mask() {
        let mut s = SignalState::new(SignalOwner::Thread);
        s.queue(KSigInfo::new(SIGUSR1));
        s.block.insert(SIGUSR1);
        assert!(!s.has_deliverable());
        s.block.remove(SIGUSR1);
        assert!(s.has_deliverable());
        let got = s.take_deliverable().unwrap();
        assert_eq!(got.signo, SIGUSR1);
    }

    #[test]
    fn take_deliverable_skips_blocked_and_preserves_order() {
        let mut s = SignalState::new(SignalOwner::Thread);
        s.queue(KSigInfo::new(SIGUSR1));
        s.queue(KSigInfo::new(SIGUSR2));
        s.block.insert(SIGUSR1);
        let got = s.take_deliverable().unwrap();
        assert_eq!(got.signo, SIGUSR2);
        assert_eq!(s.pending_len(), 1);
    }

    #[test]
    fn take_awaited_only_matches_wait_set() {
        let mut s = SignalState::new(SignalOwner::Thread);
        s.queue(KSigInfo::new(SIGUSR1));
        s.queue(KSigInfo::new(SIGTERM));
        s.wait.insert(SIGTERM);
        let got = s.take_awaited().unwrap();
        assert_eq!(got.signo, SIGTERM);
        assert_eq!(s.pending_len(), 1);
    }

    #[test]
    fn discard_drops_matching_pending() {
        let mut s = SignalState::new(SignalOwner::Thread);
        s.queue(KSigInfo::new(SIGUSR1));
        s.queue(KSigInfo::new(SIGUSR2));
        let mut set = SigSet::empty();
        set.insert(SIGUSR1);
        s.discard(set);
        assert_eq!(s.pending_len(), 1);
        assert_eq!(s.pending_iter().next().unwrap().signo, SIGUSR2);
    }

    #[test]
    fn fork_reinit_clears_pending_but_keeps_block_mask() {
        let mut parent = SignalState::new(SignalOwner::Process);
        parent.queue(KSigInfo::new(SIGUSR1));
        parent.block.insert(SIGTERM);
        let child = SignalState::fork_reinit(&parent);
        assert_eq!(child.pending_len(), 0);
        assert!(child.is_blocked(SIGTERM));
    }
}
