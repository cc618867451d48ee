//! Component A: the scheduler's priority queue.
//!
//! A binary max-heap of thread slots keyed by current priority, ties
//! broken by insertion order (earlier insertions win). This is the
//! scheduler's *search* structure, not a synchronization primitive —
//! readiness is expressed by a thread's runnable flag, not by queue
//! membership, so the queue happily holds entries for threads that have
//! since become non-runnable; the scheduler discovers and drops those
//! lazily at the top (see `Scheduler::pick_next`).

use alloc::vec::Vec;

/// One entry in the heap: a thread-table slot index plus the key it was
/// last ordered by, and a monotonic sequence number used to break ties
/// in favor of the earlier insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry<K> {
    slot: usize,
    key: K,
    seq: u64,
}

impl<K: Ord> Entry<K> {
    /// Max-heap ordering: higher key first; among equal keys, the
    /// smaller sequence number (earlier insertion) is "greater" so it
    /// surfaces first.
    fn heap_less(&self, other: &Self) -> bool {
        match self.key.cmp(&other.key) {
            core::cmp::Ordering::Less => true,
            core::cmp::Ordering::Greater => false,
            core::cmp::Ordering::Equal => self.seq > other.seq,
        }
    }
}

/// Binary max-heap over `(slot, key)` pairs.
pub struct PriorityQueue<K> {
    entries: Vec<Entry<K>>,
    next_seq: u64,
}

impl<K: Ord + Copy> Default for PriorityQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy> PriorityQueue<K> {
    pub const fn new() -> Self {
        PriorityQueue {
            entries: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert `slot` with key `key`.
    pub fn insert(&mut self, slot: usize, key: K) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.entries.push(Entry { slot, key, seq });
        self.sift_up(self.entries.len() - 1);
    }

    /// Peek the top (highest-priority) slot without removing it.
    pub fn peek_max(&self) -> Option<usize> {
        self.entries.first().map(|e| e.slot)
    }

    /// Remove and return the top slot.
    pub fn delete_max(&mut self) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let top = self.entries.pop().map(|e| e.slot);
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        top
    }

    /// Linear search, bounded by heap size, for the index holding
    /// `slot`. Returns `None` if not present.
    fn find_index(&self, slot: usize) -> Option<usize> {
        self.entries.iter().position(|e| e.slot == slot)
    }

    /// Change the key of the top element and restore heap order. Used
    /// by the scheduler to apply a priority penalty to the running
    /// thread without a full remove/insert.
    pub fn reschedule_root(&mut self, new_key: K) {
        if self.entries.is_empty() {
            return;
        }
        self.entries[0].key = new_key;
        self.sift_down(0);
    }

    /// Raise `slot`'s key (caller asserts `new_key >= current key`).
    pub fn increase_key(&mut self, slot: usize, new_key: K) {
        if let Some(i) = self.find_index(slot) {
            self.entries[i].key = new_key;
            self.sift_up(i);
        }
    }

    /// Lower `slot`'s key (caller asserts `new_key <= current key`).
    pub fn decrease_key(&mut self, slot: usize, new_key: K) {
        if let Some(i) = self.find_index(slot) {
            self.entries[i].key = new_key;
            self.sift_down(i);
        }
    }

    /// Remove any entry for `slot`, wherever it sits in the heap.
    /// A no-op if `slot` has no entry. Used before re-inserting a
    /// reused thread-table slot, so a terminated thread's stale entry
    /// never lingers alongside its successor's.
    pub fn remove(&mut self, slot: usize) {
        let Some(i) = self.find_index(slot) else {
            return;
        };
        let last = self.entries.len() - 1;
        if i == last {
            self.entries.pop();
            return;
        }
        self.entries.swap(i, last);
        self.entries.pop();
        // The entry swapped into `i` came from a leaf, so it can break
        // heap order in either direction: it may now outrank its new
        // parent, or still need to sink past its new children.
        if i > 0 {
            let parent = (i - 1) / 2;
            if !self.entries[i].heap_less(&self.entries[parent]) {
                self.sift_up(i);
                return;
            }
        }
        self.sift_down(i);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.entries[i].heap_less(&self.entries[parent]) {
                break;
            }
            self.entries.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.entries.len();
        loop {
            let l = 2 * i + 1;
            let r = 2 * i + 2;
            let mut largest = i;
            if l < n && self.entries[largest].heap_less(&self.entries[l]) {
                largest = l;
            }
            if r < n && self.entries[largest].heap_less(&self.entries[r]) {
                largest = r;
            }
            if largest == i {
                break;
            }
            self.entries.swap(i, largest);
            i = largest;
        }
    }
}
