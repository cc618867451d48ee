//! Buffer cache data model: the buffer (`buf`).

use alloc::vec::Vec;

bitflags::bitflags! {
    /// Buffer lifecycle flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufFlags: u32 {
        /// Exactly one owner thread holds this buffer.
        const BUSY    = 0b0000_0001;
        /// I/O has finished (possibly with `ERROR`).
        const DONE    = 0b0000_0010;
        const ERROR   = 0b0000_0100;
        const ASYNC   = 0b0000_1000;
        /// Delayed write: dirty, write deferred to the cleaner.
        const DELWRI  = 0b0001_0000;
        /// Skip writeback entirely (used for scratch buffers).
        const NOSYNC  = 0b0010_0000;
        /// Pinned: the cleaner must not evict it even when unused.
        const LOCKED  = 0b0100_0000;
        /// Excluded from core dumps.
        const NOCORE  = 0b1000_0000;
    }
}

/// A cached block of a vnode's data.
pub struct Buffer {
    pub vnode_id: u64,
    pub blkno: u64,
    pub size: usize,
    pub data: Vec<u8>,
    pub flags: BufFlags,
    /// Set alongside `ERROR`; surfaced by `bio_geterror`.
    pub error: i32,
}

impl Buffer {
    pub fn new(vnode_id: u64, blkno: u64, size: usize) -> Self {
        Buffer {
            vnode_id,
            blkno,
            size,
            data: alloc::vec![0u8; size],
            flags: BufFlags::DONE,
            error: 0,
        }
    }

    /// `bio_clrbuf`: zero-fill the data region. Flags are handled by the
    /// cache around the lock; this only touches data.
    pub fn zero_fill(&mut self) {
        for b in self.data.iter_mut() {
            *b = 0;
        }
    }

    pub fn resize(&mut self, size: usize) {
        self.data.resize(size, 0);
        self.size = size;
    }
}
