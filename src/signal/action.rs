//! Installed signal actions (spec §4.3.1).
//!
//! The original keys a red-black tree of `ksigaction` by signal number;
//! a `BTreeMap` gives the same ordered, O(log n) lookup/insert/remove
//! with none of the original's intrusive-node bookkeeping, and only
//! overridden signals need an entry at all (absent entries fall back to
//! the default-disposition table in `ksiginfo`).

use alloc::collections::BTreeMap;

/// What happens to a signal once an action is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Use the signal's default disposition.
    Dfl,
    /// Always dropped.
    Ign,
    /// Treated like a postponed/unevaluable default (spec §4.3.1: `ERR`
    /// behaves like `HOLD` in the post-scheduling hook).
    Err,
    /// Postpone: looked at again next pass.
    Hold,
    /// Deliver to a user-space handler at this address.
    Handler(usize),
}

/// An installed action plus the flags recorded alongside it (only
/// `SA_KILL`/`SA_CORE` matter to this crate; `SA_RESTART` and friends
/// are out of scope per spec §4.3.2, "no SA_NODEFER / SA_RESETHAND").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KSigAction {
    pub action: Action,
}

impl KSigAction {
    pub const DEFAULT: KSigAction = KSigAction { action: Action::Dfl };
}

/// Per-owner table of installed actions; signals with no entry use the
/// default disposition.
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    installed: BTreeMap<u8, KSigAction>,
}

impl ActionTable {
    pub fn new() -> Self {
        ActionTable {
            installed: BTreeMap::new(),
        }
    }

    pub fn get(&self, signum: u8) -> KSigAction {
        self.installed.get(&signum).copied().unwrap_or(KSigAction::DEFAULT)
    }

    pub fn set(&mut self, signum: u8, action: KSigAction) -> Option<KSigAction> {
        if action == KSigAction::DEFAULT {
            self.installed.remove(&signum)
        } else {
            self.installed.insert(signum, action)
        }
    }

    pub fn reset(&mut self, signum: u8) {
        self.installed.remove(&signum);
    }

    /// Deep copy, used by `fork_reinit` (spec §4.3.10): the child's
    /// table is cloned node-by-node so later installs on one side never
    /// affect the other.
    pub fn clone_deep(&self) -> ActionTable {
        ActionTable {
            installed: self.installed.clone(),
        }
    }
}

/// Result of evaluating an action in the post-scheduling hook
/// (spec §4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Drop,
    Postpone,
    Deliver(usize),
}

/// Evaluate `action`, as spec §4.3.1 describes. `DFL` with `KILL` in
/// its default disposition is handled earlier, at enqueue time (spec
/// §4.3.3) — by the time this runs, any surviving `DFL` signal is
/// treated as a no-op for handler-selection purposes, same as `IGN`/`ERR`.
pub fn evaluate(action: KSigAction) -> Evaluation {
    match action.action {
        Action::Ign | Action::Err | Action::Dfl => Evaluation::Drop,
        Action::Hold => Evaluation::Postpone,
        Action::Handler(addr) => Evaluation::Deliver(addr),
    }
}
