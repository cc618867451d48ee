//! POSIX-style signal delivery state machine. This is the piece that
//! cooperates most tightly with the scheduler, interrupting threads on
//! the way back to user space and tearing them down on fatal signals.
//!
//! `ksiginfo` is the data the other modules move around,
//! `sigset`/`action`/`state` are the data model, and `posthook`/`ops`
//! are the operations that move signals through it.

pub mod action;
pub mod ksiginfo;
pub mod ops;
pub mod posthook;
pub mod sigset;
pub mod state;

pub use action::{Action, ActionTable, KSigAction};
pub use ksiginfo::{KSigInfo, SigParam};
pub use ops::{MaskHow, SenderInfo, SyscallExitAction};
pub use posthook::{PostHookOutcome, UserFrame};
pub use sigset::SigSet;
pub use state::{SignalFlags, SignalOwner, SignalState};
