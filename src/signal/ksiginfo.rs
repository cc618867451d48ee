//! Signal numbers, the default-disposition table, and `ksiginfo`
//! (spec §3, "ksiginfo"; spec §4.3.1).

/// Highest valid signal number; `signum` arguments must fall in
/// `(0, MAXSIG]`.
pub const MAXSIG: u8 = 31;

pub const SIGHUP: u8 = 1;
pub const SIGINT: u8 = 2;
pub const SIGQUIT: u8 = 3;
pub const SIGILL: u8 = 4;
pub const SIGTRAP: u8 = 5;
pub const SIGABRT: u8 = 6;
pub const SIGCHLD: u8 = 7;
pub const SIGFPE: u8 = 8;
pub const SIGKILL: u8 = 9;
pub const SIGBUS: u8 = 10;
pub const SIGSEGV: u8 = 11;
pub const SIGCONT: u8 = 12;
pub const SIGPIPE: u8 = 13;
pub const SIGALRM: u8 = 14;
pub const SIGTERM: u8 = 15;
pub const SIGSTOP: u8 = 16;
pub const SIGTSTP: u8 = 17;
pub const SIGTTIN: u8 = 18;
pub const SIGTTOU: u8 = 19;
pub const SIGUSR1: u8 = 20;
pub const SIGUSR2: u8 = 21;
pub const SIGSYS: u8 = 22;
pub const SIGURG: u8 = 23;
pub const SIGINFO: u8 = 24;
pub const SIGPWR: u8 = 25;
pub const SIGCHLDTHRD: u8 = 26;
pub const SIGCANCEL: u8 = 27;
/// Internal mutex signal used for priority inheritance; excluded when
/// `sigsleep` decides whether a pending signal should wake it early.
pub const SIGMTX: u8 = 31;

/// `si_code` values the core itself assigns (as opposed to ones a
/// sender supplies).
pub const CLD_KILLED: i32 = 1;
pub const CLD_DUMPED: i32 = 2;
pub const ILL_BADSTK: i32 = 3;

bitflags::bitflags! {
    /// Default-disposition flags (spec §4.3.1). These combine: e.g.
    /// `KILL | CORE` for signals that terminate with a core dump.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SigDisposition: u8 {
        const KILL     = 0b00001;
        const CORE     = 0b00010;
        const IGNORE   = 0b00100;
        const CONT     = 0b01000;
        const STOP     = 0b10000;
        const TTYSTOP  = 0b100000;
    }
}

/// Default disposition per signal number, indexed by `signum` (index 0
/// unused). Mirrors `default_sigproptbl` in the kernel this crate is
/// modeled on.
const DEFAULT_DISPOSITION: [SigDisposition; 32] = {
    use SigDisposition as D;
    let ignore = D::IGNORE;
    let kill = D::KILL;
    let kill_core = D::KILL.union(D::CORE);
    let stop = D::STOP;
    let stop_tty = D::STOP.union(D::TTYSTOP);
    [
        D::empty(),   // 0: not a signal
        kill,         // 1 SIGHUP
        kill,         // 2 SIGINT
        kill_core,    // 3 SIGQUIT
        kill_core,    // 4 SIGILL
        kill_core,    // 5 SIGTRAP
        kill_core,    // 6 SIGABRT
        ignore,       // 7 SIGCHLD
        kill_core,    // 8 SIGFPE
        kill,         // 9 SIGKILL
        kill_core,    // 10 SIGBUS
        kill_core,    // 11 SIGSEGV
        D::IGNORE.union(D::CONT), // 12 SIGCONT
        kill,         // 13 SIGPIPE
        kill,         // 14 SIGALRM
        kill,         // 15 SIGTERM
        stop,         // 16 SIGSTOP
        stop_tty,     // 17 SIGTSTP
        stop_tty,     // 18 SIGTTIN
        stop_tty,     // 19 SIGTTOU
        kill,         // 20 SIGUSR1
        kill,         // 21 SIGUSR2
        kill_core,    // 22 SIGSYS
        ignore,       // 23 SIGURG
        ignore,       // 24 SIGINFO
        kill,         // 25 SIGPWR
        ignore,       // 26 SIGCHLDTHRD
        kill,         // 27 SIGCANCEL
        ignore,       // 28 reserved
        ignore,       // 29 reserved
        ignore,       // 30 reserved
        ignore,       // 31 SIGMTX
    ]
};

/// Look up the default disposition for `signum`. Returns
/// `SigDisposition::empty()` for out-of-range numbers; callers validate
/// range separately (spec: "rejects signal numbers outside `(0, MAXSIG]`").
pub fn default_disposition(signum: u8) -> SigDisposition {
    DEFAULT_DISPOSITION
        .get(signum as usize)
        .copied()
        .unwrap_or(SigDisposition::empty())
}

pub fn is_valid_signum(signum: u8) -> bool {
    signum > 0 && signum <= MAXSIG
}

/// A queued signal instance (spec §3, "ksiginfo").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KSigInfo {
    pub signo: u8,
    pub code: i32,
    pub errno: i32,
    pub sender_tid: usize,
    pub sender_pid: usize,
    pub sender_uid: u32,
    pub addr: usize,
    pub status: i32,
    pub value: isize,
}

impl KSigInfo {
    pub fn new(signo: u8) -> Self {
        KSigInfo {
            signo,
            code: 0,
            errno: 0,
            sender_tid: 0,
            sender_pid: 0,
            sender_uid: 0,
            addr: 0,
            status: 0,
            value: 0,
        }
    }
}

/// Caller-supplied fields for a new `ksiginfo` (spec §4.3.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct SigParam {
    pub code: i32,
    pub errno: i32,
    pub addr: usize,
    pub status: i32,
    pub value: isize,
}
