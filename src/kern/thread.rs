//! Thread table: fixed-capacity descriptor pool with id recycling.
//!
//! Based on Mach4 kern/thread.h/c in structure (a `Thread` struct behind
//! atomics, a manager singleton), but the fields and lifecycle are the
//! ones named in the data model: flags, dynamic priority, time-slice
//! counter, wait-timer slot, signal bitsets, and a parent/child tree
//! instead of Mach's task/IPC-port apparatus.

use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering};

use heapless::Vec as HVec;
use spin::Mutex;

use crate::kern::config::MAX_THREADS;
use crate::kern::error::{KernError, KernResult};
use crate::kern::priority::Priority;
use crate::kern::signal::Event;

/// A thread table slot index. Id 0 is reserved for the idle thread and
/// is never returned to the free pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

impl ThreadId {
    pub const IDLE: Self = Self(0);
}

/// Thread descriptor flag bits (§3 Data model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadFlags(pub u8);

impl ThreadFlags {
    pub const IN_USE: Self = Self(0x01);
    pub const EXEC: Self = Self(0x02);
    pub const DETACH: Self = Self(0x04);
    pub const ZOMBIE: Self = Self(0x08);
    pub const KWORKER: Self = Self(0x10);
    pub const NO_SIG: Self = Self(0x20);

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// Privilege stage a saved register frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeStage {
    User = 0,
    Supervisor = 1,
}

/// A saved callee-saved register window. The HAL decides how many
/// words it needs; 16 covers every real target this kernel supports
/// (Cortex-M's r4-r11+lr, ARM11's r4-r11+lr, with room to spare).
#[derive(Debug, Clone, Copy)]
pub struct RegisterFrame {
    pub regs: [usize; 16],
}

impl RegisterFrame {
    pub const fn new() -> Self {
        Self { regs: [0; 16] }
    }
}

impl Default for RegisterFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// A thread descriptor.
pub struct Thread {
    pub id: ThreadId,
    pub owner_pid: u32,

    flags: AtomicU8,
    default_priority: Priority,
    dynamic_priority: Mutex<Priority>,

    /// Remaining ticks in the current time slice. Signed so the
    /// scheduler's `<= 0` penalty check (§4.2) reads naturally.
    pub ts_counter: AtomicI32,

    pub stack_base: usize,
    pub stack_size: usize,

    frames: Mutex<[RegisterFrame; 2]>,

    /// Slot index into the timer wheel, or -1 when none is armed.
    pub wait_timer_id: AtomicI32,

    pub pending: AtomicU32,
    pub wait_mask: AtomicU32,
    /// Signals currently blocked (`sigmask`, §4.4). A blocked signal
    /// still joins `pending`; it just can't wake a `wait()` on its own.
    pub blocked: AtomicU32,
    pub last_event: Mutex<Option<Event>>,
    pub retval: AtomicI32,

    /// Last syscall error, read back by the caller's C-library wrapper
    /// the way `errno` works on the original source (§4.6).
    pub errno: AtomicI32,

    pub parent: Mutex<Option<ThreadId>>,
    pub first_child: Mutex<Option<ThreadId>>,
    pub next_sibling: Mutex<Option<ThreadId>>,
}

impl Thread {
    fn vacant() -> Self {
        Self {
            id: ThreadId(0),
            owner_pid: 0,
            flags: AtomicU8::new(0),
            default_priority: Priority::Normal,
            dynamic_priority: Mutex::new(Priority::Normal),
            ts_counter: AtomicI32::new(0),
            stack_base: 0,
            stack_size: 0,
            frames: Mutex::new([RegisterFrame::new(); 2]),
            wait_timer_id: AtomicI32::new(-1),
            pending: AtomicU32::new(0),
            wait_mask: AtomicU32::new(0),
            blocked: AtomicU32::new(0),
            last_event: Mutex::new(None),
            retval: AtomicI32::new(0),
            errno: AtomicI32::new(0),
            parent: Mutex::new(None),
            first_child: Mutex::new(None),
            next_sibling: Mutex::new(None),
        }
    }

    pub fn flags(&self) -> ThreadFlags {
        ThreadFlags(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, f: ThreadFlags) {
        self.flags.store(f.0, Ordering::Release);
    }

    pub fn add_flags(&self, f: ThreadFlags) {
        self.flags.fetch_or(f.0, Ordering::AcqRel);
    }

    pub fn remove_flags(&self, f: ThreadFlags) {
        self.flags.fetch_and(!f.0, Ordering::AcqRel);
    }

    pub fn default_priority(&self) -> Priority {
        self.default_priority
    }

    pub fn dynamic_priority(&self) -> Priority {
        *self.dynamic_priority.lock()
    }

    pub fn set_dynamic_priority(&self, pri: Priority) {
        *self.dynamic_priority.lock() = pri;
    }

    pub fn frame(&self, stage: PrivilegeStage) -> RegisterFrame {
        self.frames.lock()[stage as usize]
    }

    pub fn set_frame(&self, stage: PrivilegeStage, frame: RegisterFrame) {
        self.frames.lock()[stage as usize] = frame;
    }

    pub fn is_zombie_and_detached(&self) -> bool {
        self.flags().contains(ThreadFlags::ZOMBIE.with(ThreadFlags::DETACH))
    }
}

// ============================================================================
// Thread Table
// ============================================================================

struct Slot {
    thread: Thread,
}

/// Fixed-capacity thread pool with LIFO id recycling (§4.1).
pub struct ThreadTable {
    slots: [Slot; MAX_THREADS],
    free_ids: HVec<usize, MAX_THREADS>,
}

impl ThreadTable {
    fn new() -> Self {
        let slots = core::array::from_fn(|_| Slot { thread: Thread::vacant() });

        // LIFO queue seeded 1..MAX_THREADS-1; id 0 is reserved for idle
        // and is never placed in the free pool.
        let mut free_ids = HVec::new();
        for id in (1..MAX_THREADS).rev() {
            let _ = free_ids.push(id);
        }

        Self { slots, free_ids }
    }

    /// Create the idle thread in slot 0. Called once during `sched::init`.
    pub fn install_idle(&mut self) {
        let slot = &mut self.slots[0];
        slot.thread = Thread::vacant();
        slot.thread.id = ThreadId::IDLE;
        slot.thread.set_flags(ThreadFlags::IN_USE.with(ThreadFlags::EXEC));
        slot.thread.set_dynamic_priority(Priority::Idle);
        slot.thread.ts_counter.store(Priority::Idle.time_slice() as i32, Ordering::Relaxed);
    }

    /// Allocate a descriptor for a new thread. Fails with `OutOfMemory`
    /// once the LIFO id queue is drained.
    pub fn create(
        &mut self,
        owner_pid: u32,
        priority: Priority,
        stack_base: usize,
        stack_size: usize,
        parent: Option<ThreadId>,
    ) -> KernResult<ThreadId> {
        let id = self.free_ids.pop().ok_or(KernError::OutOfMemory)?;

        let slot = &mut self.slots[id];
        slot.thread = Thread::vacant();
        slot.thread.id = ThreadId(id);
        slot.thread.owner_pid = owner_pid;
        slot.thread.default_priority = priority;
        slot.thread.set_dynamic_priority(priority);
        slot.thread.ts_counter.store(priority.time_slice() as i32, Ordering::Relaxed);
        slot.thread.stack_base = stack_base;
        slot.thread.stack_size = stack_size;
        slot.thread.set_flags(ThreadFlags::IN_USE.with(ThreadFlags::EXEC));
        *slot.thread.parent.lock() = parent;

        if let Some(parent_id) = parent {
            let parent_thread = &self.slots[parent_id.0].thread;
            let mut first_child = parent_thread.first_child.lock();
            *slot.thread.next_sibling.lock() = *first_child;
            *first_child = Some(ThreadId(id));
        }

        Ok(ThreadId(id))
    }

    /// Look up a live descriptor by id.
    pub fn get(&self, id: ThreadId) -> KernResult<&Thread> {
        let slot = self.slots.get(id.0).ok_or(KernError::NoSuchThread)?;
        if !slot.thread.flags().contains(ThreadFlags::IN_USE) {
            return Err(KernError::NoSuchThread);
        }
        Ok(&slot.thread)
    }

    /// Reclaim a slot: clears `IN_USE` and pushes the id back onto the
    /// free queue. Id 0 (idle) may never be released.
    pub fn release(&mut self, id: ThreadId) -> KernResult<()> {
        if id == ThreadId::IDLE {
            return Err(KernError::NotPermitted);
        }
        let slot = self.slots.get_mut(id.0).ok_or(KernError::NoSuchThread)?;
        if !slot.thread.flags().contains(ThreadFlags::IN_USE) {
            return Err(KernError::NoSuchThread);
        }
        slot.thread.set_flags(ThreadFlags(0));
        // Best-effort push; a full queue here would mean more free ids
        // than the table has slots, which cannot happen.
        let _ = self.free_ids.push(id.0);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        MAX_THREADS
    }

    pub fn free_count(&self) -> usize {
        self.free_ids.len()
    }

    /// All live thread ids, for terminate/enumerate passes.
    pub fn live_ids(&self) -> HVec<ThreadId, MAX_THREADS> {
        let mut out = HVec::new();
        for slot in &self.slots {
            if slot.thread.flags().contains(ThreadFlags::IN_USE) {
                let _ = out.push(slot.thread.id);
            }
        }
        out
    }
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

static THREAD_TABLE: spin::Once<Mutex<ThreadTable>> = spin::Once::new();

pub fn thread_table() -> &'static Mutex<ThreadTable> {
    THREAD_TABLE.call_once(|| Mutex::new(ThreadTable::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_release_round_trips_free_ids() {
        let mut table = ThreadTable::new();
        let before = table.free_count();

        let id = table.create(0, Priority::Normal, 0, 0, None).unwrap();
        assert_eq!(table.free_count(), before - 1);

        table.release(id).unwrap();
        assert_eq!(table.free_count(), before);
    }

    #[test]
    fn idle_slot_cannot_be_released() {
        let mut table = ThreadTable::new();
        table.install_idle();
        assert_eq!(table.release(ThreadId::IDLE), Err(KernError::NotPermitted));
    }

    #[test]
    fn out_of_memory_once_pool_drained() {
        let mut table = ThreadTable::new();
        let cap = table.capacity() - 1; // id 0 reserved
        for _ in 0..cap {
            table.create(0, Priority::Normal, 0, 0, None).unwrap();
        }
        assert_eq!(
            table.create(0, Priority::Normal, 0, 0, None),
            Err(KernError::OutOfMemory)
        );
    }

    #[test]
    fn parent_child_links_are_recorded() {
        let mut table = ThreadTable::new();
        let parent = table.create(0, Priority::Normal, 0, 0, None).unwrap();
        let child = table.create(0, Priority::Normal, 0, 0, Some(parent)).unwrap();

        assert_eq!(*table.get(parent).unwrap().first_child.lock(), Some(child));
        assert_eq!(*table.get(child).unwrap().parent.lock(), Some(parent));
    }

    #[test]
    fn lookup_of_freed_id_is_not_found() {
        let mut table = ThreadTable::new();
        let id = table.create(0, Priority::Normal, 0, 0, None).unwrap();
        table.release(id).unwrap();
        assert_eq!(table.get(id).unwrap_err(), KernError::NoSuchThread);
    }
}
