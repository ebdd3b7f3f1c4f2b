//! Locking Primitives
//!
//! Based on Mach4 kern/lock.h/c by Avadis Tevanian, Jr. and Michael Wayne Young
//!
//! Provides:
//! - Simple spin locks for short critical sections
//! - Read/write locks for multiple-reader, single-writer scenarios
//! - Mutex locks for sleeping
//!
//! Rust's ownership model provides many of the guarantees that Mach's locks
//! were designed to provide. These primitives are provided for compatibility
//! and for cases where the spin-based approach is more appropriate.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};

use heapless::Vec as HVec;

use crate::kern::config::{MAX_THREADS, MUTEX_SEM_MAX};
use crate::kern::error::{KernError, KernResult};
use crate::kern::thread::{thread_table, ThreadId, ThreadTable};

// ============================================================================
// Simple Lock (Spin Lock)
// ============================================================================

/// A simple spin lock
///
/// This is the basic locking primitive. It spins waiting for the lock
/// to become available. Should only be used for very short critical sections.
#[repr(C)]
pub struct SimpleLock {
    lock_data: AtomicBool,
}

impl core::fmt::Debug for SimpleLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimpleLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl SimpleLock {
    /// Create a new unlocked simple lock
    pub const fn new() -> Self {
        Self {
            lock_data: AtomicBool::new(false),
        }
    }

    /// Initialize the lock
    pub fn init(&self) {
        self.lock_data.store(false, Ordering::Release);
    }

    /// Acquire the lock, spinning until available
    pub fn lock(&self) {
        while self
            .lock_data
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Spin with a hint to the CPU
            while self.lock_data.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Release the lock
    pub fn unlock(&self) {
        self.lock_data.store(false, Ordering::Release);
    }

    /// Try to acquire the lock without blocking
    pub fn try_lock(&self) -> bool {
        self.lock_data
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Check if the lock is held
    pub fn is_locked(&self) -> bool {
        self.lock_data.load(Ordering::Relaxed)
    }
}

impl Default for SimpleLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for SimpleLock {}
unsafe impl Sync for SimpleLock {}

// ============================================================================
// Read/Write Lock
// ============================================================================

/// Lock state constants
const LOCK_FREE: u32 = 0;
const LOCK_WRITE: u32 = 0x80000000;
const LOCK_READ_MASK: u32 = 0x7FFFFFFF;

/// A read/write lock
///
/// Allows multiple concurrent readers or a single writer.
/// Writers have priority to prevent starvation.
#[repr(C)]
pub struct RwLock {
    /// Lock state: high bit = write lock, low 31 bits = reader count
    state: AtomicU32,

    /// Writer waiting flag
    want_write: AtomicBool,

    /// Upgrade waiting flag
    want_upgrade: AtomicBool,

    /// Can this lock sleep?
    can_sleep: AtomicBool,

    /// Is someone waiting to be woken?
    waiting: AtomicBool,

    /// Recursion depth for recursive locking
    recursion_depth: AtomicU32,

    /// Thread holding write lock (for recursive locking)
    holder: AtomicUsize,

    /// Interlock for modifying the lock structure
    interlock: SimpleLock,
}

impl RwLock {
    /// Create a new unlocked read/write lock
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(LOCK_FREE),
            want_write: AtomicBool::new(false),
            want_upgrade: AtomicBool::new(false),
            can_sleep: AtomicBool::new(true),
            waiting: AtomicBool::new(false),
            recursion_depth: AtomicU32::new(0),
            holder: AtomicUsize::new(0),
            interlock: SimpleLock::new(),
        }
    }

    /// Initialize the lock
    pub fn init(&self, can_sleep: bool) {
        self.state.store(LOCK_FREE, Ordering::Release);
        self.want_write.store(false, Ordering::Release);
        self.want_upgrade.store(false, Ordering::Release);
        self.can_sleep.store(can_sleep, Ordering::Release);
        self.waiting.store(false, Ordering::Release);
        self.recursion_depth.store(0, Ordering::Release);
        self.holder.store(0, Ordering::Release);
        self.interlock.init();
    }

    /// Set whether the lock can sleep
    pub fn set_sleepable(&self, can_sleep: bool) {
        self.can_sleep.store(can_sleep, Ordering::Release);
    }

    /// Acquire the lock for writing (exclusive access)
    pub fn write(&self) {
        self.interlock.lock();

        loop {
            let state = self.state.load(Ordering::Relaxed);

            // If lock is free, acquire for writing
            if state == LOCK_FREE {
                self.state.store(LOCK_WRITE, Ordering::Release);
                self.interlock.unlock();
                return;
            }

            // Mark that a writer is waiting
            self.want_write.store(true, Ordering::Release);
            self.interlock.unlock();

            // Spin waiting
            while self.state.load(Ordering::Relaxed) != LOCK_FREE {
                core::hint::spin_loop();
            }

            self.interlock.lock();
        }
    }

    /// Acquire the lock for reading (shared access)
    pub fn read(&self) {
        self.interlock.lock();

        loop {
            let state = self.state.load(Ordering::Relaxed);

            // Can acquire for read if:
            // - No write lock held
            // - No writer waiting (to prevent starvation)
            if (state & LOCK_WRITE) == 0 && !self.want_write.load(Ordering::Relaxed) {
                self.state.fetch_add(1, Ordering::AcqRel);
                self.interlock.unlock();
                return;
            }

            self.interlock.unlock();

            // Spin waiting
            while self.state.load(Ordering::Relaxed) & LOCK_WRITE != 0
                || self.want_write.load(Ordering::Relaxed)
            {
                core::hint::spin_loop();
            }

            self.interlock.lock();
        }
    }

    /// Release the lock (works for both read and write)
    pub fn done(&self) {
        self.interlock.lock();

        let state = self.state.load(Ordering::Relaxed);

        if state & LOCK_WRITE != 0 {
            // Releasing write lock
            self.state.store(LOCK_FREE, Ordering::Release);
            self.want_write.store(false, Ordering::Release);
            self.holder.store(0, Ordering::Release);
        } else if state > 0 {
            // Releasing read lock
            self.state.fetch_sub(1, Ordering::AcqRel);
        }

        self.interlock.unlock();
    }

    /// Try to acquire the lock for writing without blocking
    pub fn try_write(&self) -> bool {
        if !self.interlock.try_lock() {
            return false;
        }

        let state = self.state.load(Ordering::Relaxed);

        if state == LOCK_FREE {
            self.state.store(LOCK_WRITE, Ordering::Release);
            self.interlock.unlock();
            true
        } else {
            self.interlock.unlock();
            false
        }
    }

    /// Try to acquire the lock for reading without blocking
    pub fn try_read(&self) -> bool {
        if !self.interlock.try_lock() {
            return false;
        }

        let state = self.state.load(Ordering::Relaxed);

        if (state & LOCK_WRITE) == 0 && !self.want_write.load(Ordering::Relaxed) {
            self.state.fetch_add(1, Ordering::AcqRel);
            self.interlock.unlock();
            true
        } else {
            self.interlock.unlock();
            false
        }
    }

    /// Upgrade from read lock to write lock
    ///
    /// Returns true if upgrade was successful, false if someone else
    /// is already trying to upgrade (in which case you must release
    /// the read lock and acquire a write lock normally).
    pub fn read_to_write(&self) -> bool {
        self.interlock.lock();

        // Check if someone is already upgrading
        if self.want_upgrade.load(Ordering::Relaxed) {
            self.interlock.unlock();
            return false;
        }

        // Mark that we want to upgrade
        self.want_upgrade.store(true, Ordering::Release);

        // Release our read lock
        self.state.fetch_sub(1, Ordering::AcqRel);

        // Wait for all other readers to leave
        loop {
            let state = self.state.load(Ordering::Relaxed);

            if state == LOCK_FREE {
                self.state.store(LOCK_WRITE, Ordering::Release);
                self.want_upgrade.store(false, Ordering::Release);
                self.interlock.unlock();
                return true;
            }

            self.interlock.unlock();

            while self.state.load(Ordering::Relaxed) != LOCK_FREE {
                core::hint::spin_loop();
            }

            self.interlock.lock();
        }
    }

    /// Downgrade from write lock to read lock
    pub fn write_to_read(&self) {
        self.interlock.lock();

        // Convert write lock to read lock
        self.state.store(1, Ordering::Release);
        self.want_write.store(false, Ordering::Release);

        self.interlock.unlock();
    }

    /// Get the current reader count
    pub fn read_count(&self) -> u32 {
        self.state.load(Ordering::Relaxed) & LOCK_READ_MASK
    }

    /// Check if the lock is held for writing
    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & LOCK_WRITE != 0
    }

    /// Check if the lock is held for reading
    pub fn is_read_locked(&self) -> bool {
        let state = self.state.load(Ordering::Relaxed);
        state != LOCK_FREE && (state & LOCK_WRITE) == 0
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for RwLock {}
unsafe impl Sync for RwLock {}

// ============================================================================
// Lock Guard Types
// ============================================================================

/// RAII guard for simple lock
pub struct SimpleLockGuard<'a> {
    lock: &'a SimpleLock,
}

impl<'a> SimpleLockGuard<'a> {
    pub fn new(lock: &'a SimpleLock) -> Self {
        lock.lock();
        Self { lock }
    }
}

impl<'a> Drop for SimpleLockGuard<'a> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// RAII guard for write lock
pub struct WriteLockGuard<'a> {
    lock: &'a RwLock,
}

impl<'a> WriteLockGuard<'a> {
    pub fn new(lock: &'a RwLock) -> Self {
        lock.write();
        Self { lock }
    }
}

impl<'a> Drop for WriteLockGuard<'a> {
    fn drop(&mut self) {
        self.lock.done();
    }
}

/// RAII guard for read lock
pub struct ReadLockGuard<'a> {
    lock: &'a RwLock,
}

impl<'a> ReadLockGuard<'a> {
    pub fn new(lock: &'a RwLock) -> Self {
        lock.read();
        Self { lock }
    }
}

impl<'a> Drop for ReadLockGuard<'a> {
    fn drop(&mut self) {
        self.lock.done();
    }
}

// ============================================================================
// Spin Lock with Data (like spin::Mutex)
// ============================================================================

/// A spin lock that protects data (similar to spin::Mutex)
pub struct SpinLock<T> {
    lock: SimpleLock,
    data: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            lock: SimpleLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock.lock();
        SpinLockGuard { lock: self }
    }

    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.lock.try_lock() {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> core::ops::Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> core::ops::DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.lock.unlock();
    }
}

// ============================================================================
// Mutex (§4.5)
// ============================================================================

/// A sleeping mutex: test-and-set on the fast path, enqueue-and-yield
/// to the scheduler on contention. Unlike [`SimpleLock`] this never
/// spins past the first attempt — a blocked thread is taken off the
/// run queue entirely (§4.5's Open Question rules out busy-waiting a
/// userspace-visible primitive).
pub struct Mutex {
    owner: AtomicI32,
    waiters: SpinLock<HVec<ThreadId, MAX_THREADS>>,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            owner: AtomicI32::new(-1),
            waiters: SpinLock::new(HVec::new()),
        }
    }

    fn try_acquire(&self, current: ThreadId) -> bool {
        self.owner
            .compare_exchange(-1, current.0 as i32, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquire the mutex, blocking the caller if it's already held.
    /// `timeout_ms` of 0 waits unbounded; a nonzero value arms a timer
    /// so the caller is eventually woken with `KernError::Timeout` even
    /// if the mutex never frees up (§4.5).
    pub fn acquire(&self, current: ThreadId, timeout_ms: u32) -> KernResult<()> {
        if self.try_acquire(current) {
            return Ok(());
        }
        self.waiters
            .lock()
            .push(current)
            .map_err(|_| KernError::OutOfMemory)?;

        if timeout_ms != 0 {
            let slot = crate::kern::timer::add(current, crate::kern::timer::TimerKind::Oneshot, timeout_ms)?;
            let table = ThreadTableHandle::lock();
            table.get(current)?.wait_timer_id.store(slot as i32, Ordering::Release);
        }

        crate::kern::sched::sleep_current(current)
    }

    /// Release the mutex. Only the current owner may do so.
    pub fn release(&self, current: ThreadId) -> KernResult<()> {
        if self.owner.load(Ordering::Acquire) != current.0 as i32 {
            return Err(KernError::ResourceBusy);
        }

        let next = {
            let mut waiters = self.waiters.lock();
            highest_priority_waiter(&mut waiters)
        };

        match next {
            Some(next_id) => {
                self.owner.store(next_id.0 as i32, Ordering::Release);
                wake(next_id)
            }
            None => {
                self.owner.store(-1, Ordering::Release);
                Ok(())
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != -1
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

// ============================================================================
// Mutex/semaphore handle tables (§4.6 MUTEX/SEM group)
// ============================================================================
//
// The syscall layer addresses mutexes and semaphores by a small integer
// handle into one of these fixed tables rather than by raw user-memory
// address: §4.5 describes the mutex as "a word holding {owner_id,
// lock}", but without the MMU plumbing to make a user-space word safe
// to dereference from kernel context (an explicit Non-goal), a
// kernel-owned slot table gives the same semantics — one word of
// shared state per handle — without trusting a user pointer.

static MUTEX_TABLE: [Mutex; MUTEX_SEM_MAX] = {
    const INIT: Mutex = Mutex::new();
    [INIT; MUTEX_SEM_MAX]
};

static SEM_TABLE: [Semaphore; MUTEX_SEM_MAX] = {
    const INIT: Semaphore = Semaphore::new(0);
    [INIT; MUTEX_SEM_MAX]
};

fn mutex_handle(handle: usize) -> KernResult<&'static Mutex> {
    MUTEX_TABLE.get(handle).ok_or(KernError::Invalid)
}

fn sem_handle(handle: usize) -> KernResult<&'static Semaphore> {
    SEM_TABLE.get(handle).ok_or(KernError::Invalid)
}

/// `test_and_set` syscall minor: try the fast path, falling back to
/// enqueue-and-sleep on contention, exactly as [`Mutex::acquire`].
pub fn mutex_test_and_set(handle: usize, current: ThreadId, timeout_ms: u32) -> KernResult<()> {
    mutex_handle(handle)?.acquire(current, timeout_ms)
}

pub fn mutex_release(handle: usize, current: ThreadId) -> KernResult<()> {
    mutex_handle(handle)?.release(current)
}

pub fn sem_wait(handle: usize, current: ThreadId, timeout_ms: u32) -> KernResult<()> {
    sem_handle(handle)?.wait(current, timeout_ms)
}

pub fn sem_release(handle: usize) -> KernResult<()> {
    sem_handle(handle)?.release()
}

// ============================================================================
// Semaphore (§4.5)
// ============================================================================

/// A counting semaphore. `wait` decrements the count, blocking the
/// caller (enqueue-and-sleep, not a spin) when it would go negative;
/// `release` increments it and wakes the highest-priority waiter
/// directly into ownership of the freed unit rather than letting it
/// race newcomers for the count.
pub struct Semaphore {
    count: AtomicI32,
    waiters: SpinLock<HVec<ThreadId, MAX_THREADS>>,
}

impl Semaphore {
    pub const fn new(initial: i32) -> Self {
        Self {
            count: AtomicI32::new(initial),
            waiters: SpinLock::new(HVec::new()),
        }
    }

    /// Decrement the count, blocking the caller if it would go negative.
    /// `timeout_ms` of 0 waits unbounded; a nonzero value arms a timer
    /// alongside the wait, same as [`Mutex::acquire`].
    pub fn wait(&self, current: ThreadId, timeout_ms: u32) -> KernResult<()> {
        loop {
            let c = self.count.load(Ordering::Acquire);
            if c <= 0 {
                break;
            }
            if self
                .count
                .compare_exchange(c, c - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }

        self.waiters
            .lock()
            .push(current)
            .map_err(|_| KernError::OutOfMemory)?;

        if timeout_ms != 0 {
            let slot = crate::kern::timer::add(current, crate::kern::timer::TimerKind::Oneshot, timeout_ms)?;
            let table = ThreadTableHandle::lock();
            table.get(current)?.wait_timer_id.store(slot as i32, Ordering::Release);
        }

        crate::kern::sched::sleep_current(current)
    }

    pub fn release(&self) -> KernResult<()> {
        let next = {
            let mut waiters = self.waiters.lock();
            highest_priority_waiter(&mut waiters)
        };

        match next {
            Some(id) => wake(id),
            None => {
                self.count.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
        }
    }

    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

fn highest_priority_waiter(waiters: &mut HVec<ThreadId, MAX_THREADS>) -> Option<ThreadId> {
    if waiters.is_empty() {
        return None;
    }
    let table = ThreadTableHandle::lock();
    let mut best_idx = 0;
    let mut best_pri = table.get(waiters[0]).ok()?.default_priority();
    for (i, id) in waiters.iter().enumerate().skip(1) {
        if let Ok(t) = table.get(*id) {
            if t.default_priority() > best_pri {
                best_pri = t.default_priority();
                best_idx = i;
            }
        }
    }
    drop(table);
    Some(waiters.swap_remove(best_idx))
}

fn wake(id: ThreadId) -> KernResult<()> {
    let (pri, timer_id) = {
        let table = ThreadTableHandle::lock();
        let thread = table.get(id)?;
        (thread.default_priority(), thread.wait_timer_id.swap(-1, Ordering::AcqRel))
    };
    if timer_id >= 0 {
        crate::kern::timer::release(timer_id as usize);
    }
    crate::kern::sched::set_exec(id, pri)
}

/// Thin indirection so this module doesn't need to name
/// `spin::MutexGuard<ThreadTable>` directly.
struct ThreadTableHandle;

impl ThreadTableHandle {
    fn lock() -> spin::MutexGuard<'static, ThreadTable> {
        thread_table().lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_lock() {
        let lock = SimpleLock::new();

        assert!(!lock.is_locked());

        lock.lock();
        assert!(lock.is_locked());

        lock.unlock();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_simple_lock_try() {
        let lock = SimpleLock::new();

        assert!(lock.try_lock());
        assert!(!lock.try_lock());

        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn test_rwlock_read() {
        let lock = RwLock::new();

        lock.read();
        assert!(lock.is_read_locked());
        assert!(!lock.is_write_locked());

        // Can acquire multiple read locks
        lock.read();
        assert_eq!(lock.read_count(), 2);

        lock.done();
        lock.done();
        assert!(!lock.is_read_locked());
    }

    #[test]
    fn test_rwlock_write() {
        let lock = RwLock::new();

        lock.write();
        assert!(lock.is_write_locked());
        assert!(!lock.is_read_locked());

        lock.done();
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn test_spinlock_guard() {
        let lock = SpinLock::new(42);

        {
            let mut guard = lock.lock();
            assert_eq!(*guard, 42);
            *guard = 100;
        }

        let guard = lock.lock();
        assert_eq!(*guard, 100);
    }

    #[test]
    fn mutex_second_acquirer_blocks_and_release_hands_off() {
        crate::kern::sched::init();
        let mut table = thread_table().lock();
        let a = table.create(0, crate::kern::priority::Priority::Normal, 0, 0, None).unwrap();
        let b = table.create(0, crate::kern::priority::Priority::Normal, 0, 0, None).unwrap();
        drop(table);

        let mtx = Mutex::new();
        mtx.acquire(a, 0).unwrap();
        assert!(mtx.is_locked());

        // b can't take it; it gets enqueued instead of spinning.
        mtx.acquire(b, 0).unwrap();

        mtx.release(a).unwrap();
        // Ownership handed directly to b.
        assert_eq!(mtx.release(b), Ok(()));
    }

    #[test]
    fn mutex_release_by_non_owner_is_rejected() {
        crate::kern::sched::init();
        let mut table = thread_table().lock();
        let a = table.create(0, crate::kern::priority::Priority::Normal, 0, 0, None).unwrap();
        let b = table.create(0, crate::kern::priority::Priority::Normal, 0, 0, None).unwrap();
        drop(table);

        let mtx = Mutex::new();
        mtx.acquire(a, 0).unwrap();
        assert_eq!(mtx.release(b), Err(KernError::ResourceBusy));
    }

    #[test]
    fn semaphore_wait_consumes_count_and_release_restores_it() {
        let sem = Semaphore::new(1);
        let a = ThreadId(1);

        sem.wait(a, 0).unwrap();
        assert_eq!(sem.count(), 0);

        sem.release().unwrap();
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn mutex_handle_out_of_range_is_invalid() {
        assert_eq!(
            mutex_test_and_set(MUTEX_SEM_MAX, ThreadId(1), 0),
            Err(KernError::Invalid)
        );
        assert_eq!(sem_wait(MUTEX_SEM_MAX, ThreadId(1), 0), Err(KernError::Invalid));
    }
}
