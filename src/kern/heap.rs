//! Priority heap: intrusive array-backed max-heap keyed on dynamic
//! priority, indexed by thread table id (§9 Design Notes).
//!
//! Grounded on `examples/original_source/kern/sched_tiny/heap.c`'s
//! array-based max-heap (`parent`/`left`/`right`, bubble-up insert,
//! `heap_reschedule_root` for the aging penalty, `heap_inc_key` for the
//! float-to-top-then-reap trick `sleep_current` uses). The 0-index
//! convention here differs cosmetically from the source's 1-index
//! array (which reserved slot 0 as a sentinel); the operations are the
//! same shape.

use heapless::Vec as HVec;

use crate::kern::config::MAX_THREADS;
use crate::kern::thread::ThreadId;

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: ThreadId,
    key: u8,
}

/// Max-heap of runnable thread ids keyed on dynamic priority rank.
pub struct PriorityHeap {
    entries: HVec<Entry, MAX_THREADS>,
    /// `position[id] = Some(index)` iff thread `id` is currently in the
    /// heap; gives O(1) key updates instead of a linear `heap_find`.
    position: [Option<usize>; MAX_THREADS],
}

impl PriorityHeap {
    pub const fn new() -> Self {
        Self {
            entries: HVec::new(),
            position: [None; MAX_THREADS],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.position[id.0].is_some()
    }

    fn parent(i: usize) -> Option<usize> {
        if i == 0 {
            None
        } else {
            Some((i - 1) / 2)
        }
    }

    fn left(i: usize) -> usize {
        2 * i + 1
    }

    fn right(i: usize) -> usize {
        2 * i + 2
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.position[self.entries[a].id.0] = Some(a);
        self.position[self.entries[b].id.0] = Some(b);
    }

    fn bubble_up(&mut self, mut i: usize) {
        while let Some(p) = Self::parent(i) {
            if self.entries[p].key < self.entries[i].key {
                self.swap(p, i);
                i = p;
            } else {
                break;
            }
        }
    }

    fn bubble_down(&mut self, mut i: usize) {
        loop {
            let l = Self::left(i);
            let r = Self::right(i);
            let mut largest = i;

            if l < self.entries.len() && self.entries[l].key > self.entries[largest].key {
                largest = l;
            }
            if r < self.entries.len() && self.entries[r].key > self.entries[largest].key {
                largest = r;
            }
            if largest == i {
                break;
            }
            self.swap(i, largest);
            i = largest;
        }
    }

    /// Insert a thread at the given key. If already present, its key is
    /// updated in place instead (matches the source treating re-insert
    /// of a present id as a key update).
    pub fn insert(&mut self, id: ThreadId, key: u8) {
        if let Some(i) = self.position[id.0] {
            self.update_key(i, key);
            return;
        }
        let i = self.entries.len();
        // A full heap means every thread table slot is EXEC, including
        // idle; the table's own capacity already bounds this.
        let _ = self.entries.push(Entry { id, key });
        self.position[id.0] = Some(i);
        self.bubble_up(i);
    }

    fn update_key(&mut self, i: usize, new_key: u8) {
        let old_key = self.entries[i].key;
        self.entries[i].key = new_key;
        if new_key > old_key {
            self.bubble_up(i);
        } else if new_key < old_key {
            self.bubble_down(i);
        }
    }

    /// Peek the highest-priority thread without removing it.
    pub fn peek(&self) -> Option<ThreadId> {
        self.entries.first().map(|e| e.id)
    }

    /// Remove and return the highest-priority thread.
    pub fn pop(&mut self) -> Option<ThreadId> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let popped = self.entries.pop().unwrap();
        self.position[popped.id.0] = None;
        if !self.entries.is_empty() {
            self.position[self.entries[0].id.0] = Some(0);
            self.bubble_down(0);
        }
        Some(popped.id)
    }

    /// Remove an arbitrary thread from the heap (e.g. on termination).
    pub fn remove(&mut self, id: ThreadId) -> bool {
        let Some(i) = self.position[id.0] else {
            return false;
        };
        let last = self.entries.len() - 1;
        if i != last {
            self.swap(i, last);
        }
        self.entries.pop();
        self.position[id.0] = None;
        if i < self.entries.len() {
            self.bubble_down(i);
            self.bubble_up(i);
        }
        true
    }

    /// Demote the root's key and re-heapify from the root — the aging
    /// "penalty" (§4.2 context_switch step (c)), grounded on
    /// `heap_reschedule_root` in the source.
    pub fn reschedule_root(&mut self, new_key: u8) {
        if self.entries.is_empty() {
            return;
        }
        self.update_key(0, new_key);
    }

    /// Raise a thread's key so it floats toward the root without
    /// changing the stored priority value — used by `sleep_current` to
    /// guarantee the next `context_switch` pass discovers and evicts a
    /// thread whose `EXEC` flag was just cleared, by giving it the
    /// highest key in the heap.
    pub fn float_to_top(&mut self, id: ThreadId) {
        if let Some(i) = self.position[id.0] {
            self.update_key(i, u8::MAX);
        }
    }
}

impl Default for PriorityHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_descending_key_order() {
        let mut heap = PriorityHeap::new();
        heap.insert(ThreadId(1), 3);
        heap.insert(ThreadId(2), 7);
        heap.insert(ThreadId(3), 1);

        assert_eq!(heap.pop(), Some(ThreadId(2)));
        assert_eq!(heap.pop(), Some(ThreadId(1)));
        assert_eq!(heap.pop(), Some(ThreadId(3)));
        assert_eq!(heap.pop(), None);
    }

    #[test]
    fn reinsert_updates_key_in_place() {
        let mut heap = PriorityHeap::new();
        heap.insert(ThreadId(1), 1);
        heap.insert(ThreadId(2), 2);
        assert_eq!(heap.len(), 2);

        heap.insert(ThreadId(1), 9);
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.peek(), Some(ThreadId(1)));
    }

    #[test]
    fn reschedule_root_demotes_and_reheapifies() {
        let mut heap = PriorityHeap::new();
        heap.insert(ThreadId(1), 5);
        heap.insert(ThreadId(2), 3);
        assert_eq!(heap.peek(), Some(ThreadId(1)));

        heap.reschedule_root(0);
        assert_eq!(heap.peek(), Some(ThreadId(2)));
    }

    #[test]
    fn float_to_top_brings_thread_to_root() {
        let mut heap = PriorityHeap::new();
        heap.insert(ThreadId(1), 5);
        heap.insert(ThreadId(2), 1);
        heap.float_to_top(ThreadId(2));
        assert_eq!(heap.peek(), Some(ThreadId(2)));
    }

    #[test]
    fn remove_drops_membership() {
        let mut heap = PriorityHeap::new();
        heap.insert(ThreadId(1), 5);
        heap.insert(ThreadId(2), 3);
        assert!(heap.remove(ThreadId(1)));
        assert!(!heap.contains(ThreadId(1)));
        assert_eq!(heap.peek(), Some(ThreadId(2)));
    }
}
