//! Scheduler core (§4.2)
//!
//! Owns the priority heap and the currently-running thread id. Based on
//! the same "pick highest, tax the slice, penalise the spinner" shape
//! as `examples/original_source/kern/sched_tiny/tsched.c`'s
//! `sched_context_switch`, rebuilt over [`PriorityHeap`] instead of a
//! Mach run-queue array.
//!
//! The logic lives on [`Scheduler`], which takes an explicit
//! `&ThreadTable` on every call (mirrors `ThreadTable`'s own
//! stand-alone testability in `kern::thread`); the free functions at
//! the bottom are thin wrappers over a process-global `Scheduler` and
//! the global thread table, and are what the rest of the kernel
//! (`kern::signal`, `kern::syscall`) actually calls.

use core::cell::UnsafeCell;
use core::sync::atomic::Ordering;

use heapless::Vec as HVec;
use spin::Mutex;

use crate::kern::config::{self, LavgPeriod, MAX_THREADS};
use crate::kern::error::{KernError, KernResult};
use crate::kern::heap::PriorityHeap;
use crate::kern::priority::Priority;
use crate::kern::thread::{thread_table, ThreadFlags, ThreadId, ThreadTable};

// ============================================================================
// Load average (§4.2.1, supplemented)
// ============================================================================

const FSHIFT: u32 = 11;
const FIXED_1: i64 = 1 << FSHIFT;

/// `(FEXP_1, FEXP_5, FEXP_15)` decay constants for the active sampling
/// period, grounded on `examples/original_source/kern/sched_tiny/sched.c:51-55`.
const fn fexp_constants() -> [i64; 3] {
    match config::LAVG_PERIOD {
        LavgPeriod::Secs5 => [1884, 2014, 2037],
        LavgPeriod::Secs11 => [1704, 1974, 2023],
    }
}

fn calc_load(load: i64, exp: i64, active_scaled: i64) -> i64 {
    (load * exp + active_scaled * (FIXED_1 - exp)) >> FSHIFT
}

/// Exponentially-weighted 1/5/15-period run-queue length, behind a
/// writer-skip-on-contention reader/writer lock: a tick handler that
/// can't immediately get the write side simply drops the sample rather
/// than blocking.
struct LoadAvg {
    rw: crate::kern::lock::RwLock,
    avg: UnsafeCell<[i64; 3]>,
}

unsafe impl Sync for LoadAvg {}

impl LoadAvg {
    const fn new() -> Self {
        Self {
            rw: crate::kern::lock::RwLock::new(),
            avg: UnsafeCell::new([0; 3]),
        }
    }

    fn sample(&self, nr_runnable: i64) {
        if !self.rw.try_write() {
            return;
        }
        let scaled = nr_runnable << FSHIFT;
        let [e1, e5, e15] = fexp_constants();
        unsafe {
            let avg = &mut *self.avg.get();
            avg[0] = calc_load(avg[0], e1, scaled);
            avg[1] = calc_load(avg[1], e5, scaled);
            avg[2] = calc_load(avg[2], e15, scaled);
        }
        self.rw.done();
    }

    fn snapshot(&self) -> [i64; 3] {
        self.rw.read();
        let avg = unsafe { *self.avg.get() };
        self.rw.done();
        avg
    }
}

// ============================================================================
// Scheduler core
// ============================================================================

/// Run-queue heap plus bookkeeping, with every operation taking the
/// thread table it operates over explicitly.
pub struct Scheduler {
    heap: PriorityHeap,
    current: ThreadId,
    load_avg: LoadAvg,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            heap: PriorityHeap::new(),
            current: ThreadId::IDLE,
            load_avg: LoadAvg::new(),
        }
    }

    /// Bring up the scheduler: install the idle thread and seed the
    /// heap with it so `context_switch` always has something to return.
    pub fn init(&mut self, table: &mut ThreadTable) {
        table.install_idle();
        self.heap = PriorityHeap::new();
        self.heap.insert(ThreadId::IDLE, Priority::Idle.rank());
        self.current = ThreadId::IDLE;
    }

    pub fn current(&self) -> ThreadId {
        self.current
    }

    /// Mark a thread runnable at `priority` and place it on the heap.
    /// Used both for newly-created threads and for waking a sleeper.
    pub fn set_exec(&mut self, table: &ThreadTable, id: ThreadId, priority: Priority) -> KernResult<()> {
        let thread = table.get(id)?;
        thread.add_flags(ThreadFlags::EXEC);
        thread.set_dynamic_priority(priority);
        thread.ts_counter.store(priority.time_slice() as i32, Ordering::Relaxed);
        self.heap.insert(id, priority.rank());
        Ok(())
    }

    /// Take a thread off the run queue. Its descriptor stays `IN_USE`;
    /// it's just no longer a scheduling candidate until a matching
    /// `signal`/timeout calls `set_exec` again. Rather than removing it
    /// from the heap outright, its key is floated to the top so the very
    /// next `context_switch` pass discovers the cleared `EXEC` flag and
    /// evicts it — same trick as `heap_inc_key` in the source.
    pub fn sleep(&mut self, table: &ThreadTable, id: ThreadId) -> KernResult<()> {
        let thread = table.get(id)?;
        thread.remove_flags(ThreadFlags::EXEC);
        thread.set_dynamic_priority(Priority::Error);
        self.heap.float_to_top(id);
        Ok(())
    }

    /// Pick the next thread to run: pop the highest-priority heap root,
    /// skipping stale entries (a thread that went to sleep or was
    /// terminated without the heap catching up yet), tax its time
    /// slice, and apply the aging penalty if it just ran its slice out
    /// (§4.2 step (c)). The winner is left on the heap as the new root.
    pub fn context_switch(&mut self, table: &mut ThreadTable) -> ThreadId {
        loop {
            let Some(root_id) = self.heap.peek() else {
                self.current = ThreadId::IDLE;
                return ThreadId::IDLE;
            };

            let stale_or_gone = match table.get(root_id) {
                Ok(thread) => !thread.flags().contains(ThreadFlags::EXEC),
                Err(_) => true,
            };
            if stale_or_gone {
                self.heap.remove(root_id);
                continue;
            }

            if table.get(root_id).unwrap().is_zombie_and_detached() {
                self.heap.remove(root_id);
                let _ = table.release(root_id);
                continue;
            }

            let thread = table.get(root_id).unwrap();
            let remaining = thread.ts_counter.fetch_sub(1, Ordering::AcqRel) - 1;
            let pri = thread.dynamic_priority();

            if remaining <= 0 && !pri.is_realtime() && !pri.is_low() {
                let penalised = pri.penalised();
                thread.set_dynamic_priority(penalised);
                thread.ts_counter.store(penalised.time_slice() as i32, Ordering::Relaxed);
                self.heap.reschedule_root(penalised.rank());
                continue;
            }

            self.current = root_id;
            return root_id;
        }
    }

    /// Make a detach request idempotent: mark the thread detached, and
    /// if it's already a zombie waiting to be reaped, release it now.
    pub fn detach(&mut self, table: &mut ThreadTable, id: ThreadId) -> KernResult<()> {
        let detached_zombie = {
            let thread = table.get(id)?;
            thread.add_flags(ThreadFlags::DETACH);
            thread.is_zombie_and_detached()
        };
        if detached_zombie {
            table.release(id)?;
        }
        Ok(())
    }

    /// Tear down a thread and its subtree (children first, depth-first,
    /// via the parent/first_child/next_sibling tree). The slot is
    /// reaped immediately rather than left as a zombie iff the thread
    /// is detached, has no live parent to join it, or its parent is
    /// itself a detached zombie (§4.2); otherwise it lingers so a
    /// `join` can still read its retval.
    pub fn terminate(&mut self, table: &mut ThreadTable, id: ThreadId) -> KernResult<()> {
        if id == ThreadId::IDLE {
            return Err(KernError::NotPermitted);
        }

        let children: HVec<ThreadId, MAX_THREADS> = {
            let thread = table.get(id)?;
            let mut out = HVec::new();
            let mut next = *thread.first_child.lock();
            while let Some(child) = next {
                let _ = out.push(child);
                next = *table.get(child)?.next_sibling.lock();
            }
            out
        };

        for child in children {
            self.terminate(table, child)?;
        }

        let (detached, parent) = {
            let thread = table.get(id)?;
            thread.remove_flags(ThreadFlags::EXEC);
            thread.add_flags(ThreadFlags::ZOMBIE);
            (thread.flags().contains(ThreadFlags::DETACH), *thread.parent.lock())
        };
        self.heap.remove(id);

        let orphaned = match parent {
            None => true,
            Some(p) => table.get(p).map(|t| t.is_zombie_and_detached()).unwrap_or(true),
        };

        if detached || orphaned {
            table.release(id)?;
        }
        Ok(())
    }

    pub fn sample_load(&self) {
        self.load_avg.sample(self.heap.len() as i64);
    }

    pub fn load_average(&self) -> [i64; 3] {
        self.load_avg.snapshot()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Process-global wrappers
// ============================================================================

static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

pub fn init() {
    let mut table = thread_table().lock();
    SCHEDULER.lock().init(&mut table);
}

pub fn current() -> ThreadId {
    SCHEDULER.lock().current()
}

pub fn set_exec(id: ThreadId, priority: Priority) -> KernResult<()> {
    let table = thread_table().lock();
    SCHEDULER.lock().set_exec(&table, id, priority)
}

pub fn sleep_current(id: ThreadId) -> KernResult<()> {
    let table = thread_table().lock();
    SCHEDULER.lock().sleep(&table, id)
}

pub fn context_switch() -> ThreadId {
    let mut table = thread_table().lock();
    SCHEDULER.lock().context_switch(&mut table)
}

pub fn detach(id: ThreadId) -> KernResult<()> {
    let mut table = thread_table().lock();
    SCHEDULER.lock().detach(&mut table, id)
}

pub fn terminate(id: ThreadId) -> KernResult<()> {
    let mut table = thread_table().lock();
    SCHEDULER.lock().terminate(&mut table, id)
}

pub fn sample_load() {
    SCHEDULER.lock().sample_load();
}

pub fn load_average() -> [i64; 3] {
    SCHEDULER.lock().load_average()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (ThreadTable, Scheduler) {
        let mut table = ThreadTable::new();
        let mut sched = Scheduler::new();
        sched.init(&mut table);
        (table, sched)
    }

    #[test]
    fn init_seeds_idle_as_current() {
        let (_, sched) = setup();
        assert_eq!(sched.current(), ThreadId::IDLE);
    }

    #[test]
    fn set_exec_and_context_switch_picks_highest_priority() {
        let (mut table, mut sched) = setup();
        let a = table.create(0, Priority::Normal, 0, 0, None).unwrap();
        let b = table.create(0, Priority::High, 0, 0, None).unwrap();

        sched.set_exec(&table, a, Priority::Normal).unwrap();
        sched.set_exec(&table, b, Priority::High).unwrap();

        assert_eq!(sched.context_switch(&mut table), b);
    }

    #[test]
    fn sleep_removes_from_contention() {
        let (mut table, mut sched) = setup();
        let a = table.create(0, Priority::High, 0, 0, None).unwrap();
        sched.set_exec(&table, a, Priority::High).unwrap();
        assert_eq!(sched.context_switch(&mut table), a);

        sched.sleep(&table, a).unwrap();
        assert_eq!(sched.context_switch(&mut table), ThreadId::IDLE);
    }

    #[test]
    fn exhausted_slice_gets_penalised_to_low() {
        let (mut table, mut sched) = setup();
        let a = table.create(0, Priority::Normal, 0, 0, None).unwrap();
        sched.set_exec(&table, a, Priority::Normal).unwrap();

        let slice = Priority::Normal.time_slice();
        for _ in 0..slice {
            sched.context_switch(&mut table);
        }

        assert_eq!(table.get(a).unwrap().dynamic_priority(), Priority::Low);
    }

    #[test]
    fn realtime_thread_never_gets_penalised() {
        let (mut table, mut sched) = setup();
        let a = table.create(0, Priority::Realtime, 0, 0, None).unwrap();
        sched.set_exec(&table, a, Priority::Realtime).unwrap();

        for _ in 0..(Priority::Realtime.time_slice() * 3) {
            sched.context_switch(&mut table);
        }

        assert_eq!(table.get(a).unwrap().dynamic_priority(), Priority::Realtime);
    }

    #[test]
    fn terminate_releases_detached_thread_immediately() {
        let (mut table, mut sched) = setup();
        let a = table.create(0, Priority::Normal, 0, 0, None).unwrap();
        sched.set_exec(&table, a, Priority::Normal).unwrap();
        sched.detach(&mut table, a).unwrap();

        sched.terminate(&mut table, a).unwrap();
        assert_eq!(table.get(a).unwrap_err(), KernError::NoSuchThread);
    }

    #[test]
    fn terminate_without_detach_leaves_a_zombie() {
        // A thread with a live, non-detached parent lingers as a zombie
        // so the parent can still join it.
        let (mut table, mut sched) = setup();
        let parent = table.create(0, Priority::Normal, 0, 0, None).unwrap();
        let child = table.create(0, Priority::Normal, 0, 0, Some(parent)).unwrap();
        sched.set_exec(&table, parent, Priority::Normal).unwrap();
        sched.set_exec(&table, child, Priority::Normal).unwrap();

        sched.terminate(&mut table, child).unwrap();
        assert!(table.get(child).unwrap().flags().contains(ThreadFlags::ZOMBIE));

        sched.detach(&mut table, child).unwrap();
        assert_eq!(table.get(child).unwrap_err(), KernError::NoSuchThread);
    }

    #[test]
    fn terminate_reaps_immediately_without_a_live_parent() {
        // A root thread (no parent to join it) is reaped on the spot,
        // detach or not.
        let (mut table, mut sched) = setup();
        let a = table.create(0, Priority::Normal, 0, 0, None).unwrap();
        sched.set_exec(&table, a, Priority::Normal).unwrap();

        sched.terminate(&mut table, a).unwrap();
        assert_eq!(table.get(a).unwrap_err(), KernError::NoSuchThread);
    }

    #[test]
    fn terminate_recurses_into_children() {
        let (mut table, mut sched) = setup();
        let parent = table.create(0, Priority::Normal, 0, 0, None).unwrap();
        let child = table.create(0, Priority::Normal, 0, 0, Some(parent)).unwrap();
        sched.set_exec(&table, parent, Priority::Normal).unwrap();
        sched.set_exec(&table, child, Priority::Normal).unwrap();
        sched.detach(&mut table, parent).unwrap();
        sched.detach(&mut table, child).unwrap();

        sched.terminate(&mut table, parent).unwrap();
        assert_eq!(table.get(child).unwrap_err(), KernError::NoSuchThread);
    }

    #[test]
    fn idle_thread_cannot_be_terminated() {
        let (mut table, mut sched) = setup();
        assert_eq!(sched.terminate(&mut table, ThreadId::IDLE), Err(KernError::NotPermitted));
    }

    #[test]
    fn load_average_rises_with_runnable_threads() {
        let (mut table, mut sched) = setup();
        let before = sched.load_average()[0];
        let a = table.create(0, Priority::Normal, 0, 0, None).unwrap();
        sched.set_exec(&table, a, Priority::Normal).unwrap();

        sched.sample_load();
        assert!(sched.load_average()[0] >= before);
    }
}
