//! External interfaces.
//!
//! The execution core is accessed only through kernel-internal contracts.
//! Everything on the other side of these traits — MMU page tables, the
//! concrete filesystem, the process table, ELF core-image encoding — is
//! out of scope and lives in the surrounding kernel, not in this crate.

use crate::error::KResult;

/// Monotonic microsecond clock plus periodic-tick delivery. A platform
/// provides one implementation and hands it to the scheduler at boot.
pub trait TimerSource {
    /// Frequency of platform timer ticks, in Hz.
    fn tick_frequency(&self) -> u32;

    /// Monotonic microseconds since an arbitrary epoch. Must never go
    /// backwards.
    fn monotonic_micros(&self) -> u64;
}

/// Safe user-space memory access, backed by the MMU and page tables.
/// The signal post-scheduling hook and the syscall layer require these
/// to be safe against user-space traps: a faulting copy returns `Err`
/// rather than faulting the kernel.
pub trait AddressSpace {
    /// Copy `src` into user memory at `dst_user`. Returns `Err` if the
    /// destination range is not writable by the current user mapping.
    fn copyout(&self, src: &[u8], dst_user: usize) -> KResult<()>;

    /// Copy from user memory at `src_user` into `dst`. Returns `Err` if
    /// the source range is not readable by the current user mapping.
    fn copyin(&self, src_user: usize, dst: &mut [u8]) -> KResult<()>;

    /// Check that `len` bytes at `addr` are accessible with the
    /// requested permissions without actually transferring data.
    fn useracc(&self, addr: usize, len: usize, write: bool) -> bool;
}

/// Narrow slice of vnode operations the buffer cache drives against a
/// block device.
pub trait VnodeOps {
    /// Opaque identity used to key buffers; two handles referring to the
    /// same underlying vnode must compare equal.
    fn vnode_id(&self) -> u64;

    /// Position the vnode's file offset at `blkno` scaled by the
    /// caller's block size (bytes), analogous to `lseek(..., SEEK_SET)`.
    fn lseek(&self, byte_offset: u64) -> KResult<()>;

    /// Read up to `buf.len()` bytes at the current offset.
    fn read(&self, buf: &mut [u8]) -> KResult<usize>;

    /// Write `buf` at the current offset.
    fn write(&self, buf: &[u8]) -> KResult<usize>;
}

/// Process-table collaborator: reference counting, thread iteration,
/// and the credential check the signal subsystem needs before
/// delivering a signal across owners.
pub trait ProcessTable {
    type ThreadHandle: Copy + Eq;
    type ProcessHandle: Copy + Eq;

    /// `true` if the caller (given by `sender_uid`) is allowed to signal
    /// the owner of `target`.
    fn priv_check_signal(&self, sender_uid: u32, target: Self::ProcessHandle) -> bool;

    /// The process's designated main thread, used to decide whether a
    /// fatal-with-CORE signal should trigger a core dump.
    fn main_thread(&self, process: Self::ProcessHandle) -> Self::ThreadHandle;
}

/// Core-dump collaborator: given a process, write an ELF32 core image.
/// Invoked only on fatal-with-CORE signals.
pub trait CoreDumper<ProcessHandle> {
    fn dump(&self, process: ProcessHandle) -> KResult<()>;
}
