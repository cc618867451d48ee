//! Thread and priority data model.

use alloc::sync::Arc;
use core::fmt;

use crate::signal::state::SignalState;
use spin::Mutex;

/// Stable thread identifier. Ids are reused via a free-id queue once a
/// thread's table slot is reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

/// Owning-process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub usize);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid{}", self.0)
    }
}

/// Dynamic scheduling priority. `Error` is a sentinel: it outranks every
/// real priority in heap order so a terminated thread's slot rises to
/// the heap top and is garbage-collected on the very next scheduling
/// pass, even though semantically it is not "more important" than
/// `Realtime` — it is never handed to a user as a real priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    Normal = 2,
    Realtime = 3,
    /// Lazy-removal sentinel only; never a valid argument to `set_priority`.
    Error = 4,
}

impl Priority {
    /// Time slice handed out when a thread of this priority becomes
    /// runnable: `4 + priority_level`, so a thread penalized down to
    /// `Low` gets the shortest slice.
    pub fn initial_time_slice(self) -> i32 {
        4 + self as i32
    }
}

bitflags::bitflags! {
    /// Per-thread state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlags: u32 {
        const IN_USE            = 0b0001;
        const RUNNABLE          = 0b0010;
        const IN_SYSCALL        = 0b0100;
        /// Only a timer, not a signal, may resume this thread (set by
        /// `sleep_current`, cleared by `wait_current`/`sigwait`-style
        /// suspension).
        const NO_SIGNAL_WAKEUP  = 0b1000;
    }
}

/// A queued signal instance (forward-declared here to avoid a cycle;
/// the real definition lives in `signal::ksiginfo`).
pub use crate::signal::ksiginfo::KSigInfo;

/// A thread's full record, as kept in the scheduler's fixed-size thread
/// table.
pub struct ThreadRecord {
    pub id: ThreadId,
    pub owner_pid: ProcessId,

    /// Saved user stack pointer; written by the tick-path's step 1 and
    /// restored in step 7 for whichever thread is selected next.
    pub user_sp: usize,

    pub default_priority: Priority,
    pub priority: Priority,
    pub ts_counter: i32,
    pub flags: ThreadFlags,

    /// Owned private signal state; may be shared with a process-level
    /// owner when this thread's signals are delivered through its
    /// process instead of held privately.
    pub signals: Arc<Mutex<SignalState>>,

    /// Set when a fatal signal has been chosen for this thread; read by
    /// the caller that tears the thread down.
    pub exit_siginfo: Option<KSigInfo>,

    /// Consumed by `sigwait`/`sigtimedwait` on wakeup.
    pub sigwait_retval: Option<KSigInfo>,

    // Flat id-based inheritance links: avoids pointer cycles across a
    // table whose slots are reused.
    pub parent: Option<ThreadId>,
    pub first_child: Option<ThreadId>,
    pub next_sibling: Option<ThreadId>,
}

impl ThreadRecord {
    pub fn new(id: ThreadId, owner_pid: ProcessId, priority: Priority) -> Self {
        ThreadRecord {
            id,
            owner_pid,
            user_sp: 0,
            default_priority: priority,
            priority,
            ts_counter: priority.initial_time_slice(),
            flags: ThreadFlags::IN_USE | ThreadFlags::RUNNABLE,
            signals: Arc::new(Mutex::new(SignalState::new(
                crate::signal::state::SignalOwner::Thread,
            ))),
            exit_siginfo: None,
            sigwait_retval: None,
            parent: None,
            first_child: None,
            next_sibling: None,
        }
    }

    /// A runnable thread is in the priority queue iff `IN_USE ∧ RUNNABLE`.
    pub fn is_schedulable(&self) -> bool {
        self.flags.contains(ThreadFlags::IN_USE | ThreadFlags::RUNNABLE)
    }
}
